//! Aggregates that can be maintained incrementally.
//!
//! The allow-list is keyed by aggregate function OID, never by display
//! name, so a user-defined `sum(mytype)` is not mistaken for a built-in.
//! Each entry also records the aggregate's kind and its input and result
//! types; the rewriter resolves companion `count`/`sum` calls from it.

use crate::catalog::*;

/// Aggregate families that support incremental maintenance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggKind {
    Count,
    Sum,
    Avg,
    Max,
    Min,
}

impl AggKind {
    pub fn name(self) -> &'static str {
        match self {
            AggKind::Count => "count",
            AggKind::Sum => "sum",
            AggKind::Avg => "avg",
            AggKind::Max => "max",
            AggKind::Min => "min",
        }
    }
}

/// One supported aggregate overload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregateEntry {
    pub fn_oid: Oid,
    pub kind: AggKind,
    /// Declared input type. `INVALID_OID` for `count(*)`.
    pub input_type: Oid,
    pub result_type: Oid,
    pub star: bool,
}

const fn agg(fn_oid: Oid, kind: AggKind, input_type: Oid, result_type: Oid) -> AggregateEntry {
    AggregateEntry {
        fn_oid,
        kind,
        input_type,
        result_type,
        star: false,
    }
}

const fn same(fn_oid: Oid, kind: AggKind, input_type: Oid) -> AggregateEntry {
    agg(fn_oid, kind, input_type, input_type)
}

use AggKind::*;

/// Every aggregate overload accepted in a view definition.
pub static SUPPORTED_AGGREGATES: &[AggregateEntry] = &[
    // count
    agg(2147, Count, ANY_OID, INT8_OID),
    AggregateEntry {
        fn_oid: 2803,
        kind: Count,
        input_type: INVALID_OID,
        result_type: INT8_OID,
        star: true,
    },
    // sum
    agg(2107, Sum, INT8_OID, NUMERIC_OID),
    agg(2108, Sum, INT4_OID, INT8_OID),
    agg(2109, Sum, INT2_OID, INT8_OID),
    same(2110, Sum, FLOAT4_OID),
    same(2111, Sum, FLOAT8_OID),
    same(2112, Sum, MONEY_OID),
    same(2113, Sum, INTERVAL_OID),
    same(2114, Sum, NUMERIC_OID),
    // avg
    agg(2100, Avg, INT8_OID, NUMERIC_OID),
    agg(2101, Avg, INT4_OID, NUMERIC_OID),
    agg(2102, Avg, INT2_OID, NUMERIC_OID),
    agg(2103, Avg, NUMERIC_OID, NUMERIC_OID),
    agg(2104, Avg, FLOAT4_OID, FLOAT8_OID),
    agg(2105, Avg, FLOAT8_OID, FLOAT8_OID),
    agg(2106, Avg, INTERVAL_OID, INTERVAL_OID),
    // max
    same(2115, Max, INT8_OID),
    same(2116, Max, INT4_OID),
    same(2117, Max, INT2_OID),
    same(2118, Max, OID_OID),
    same(2119, Max, FLOAT4_OID),
    same(2120, Max, FLOAT8_OID),
    same(2122, Max, DATE_OID),
    same(2123, Max, TIME_OID),
    same(2124, Max, TIMETZ_OID),
    same(2125, Max, MONEY_OID),
    same(2126, Max, TIMESTAMP_OID),
    same(2127, Max, TIMESTAMPTZ_OID),
    same(2128, Max, INTERVAL_OID),
    same(2129, Max, TEXT_OID),
    same(2130, Max, NUMERIC_OID),
    same(2050, Max, ANYARRAY_OID),
    same(2244, Max, BPCHAR_OID),
    same(2797, Max, TID_OID),
    same(3526, Max, ANYENUM_OID),
    same(3564, Max, INET_OID),
    same(4189, Max, PG_LSN_OID),
    // min
    same(2131, Min, INT8_OID),
    same(2132, Min, INT4_OID),
    same(2133, Min, INT2_OID),
    same(2134, Min, OID_OID),
    same(2135, Min, FLOAT4_OID),
    same(2136, Min, FLOAT8_OID),
    same(2138, Min, DATE_OID),
    same(2139, Min, TIME_OID),
    same(2140, Min, TIMETZ_OID),
    same(2141, Min, MONEY_OID),
    same(2142, Min, TIMESTAMP_OID),
    same(2143, Min, TIMESTAMPTZ_OID),
    same(2144, Min, INTERVAL_OID),
    same(2145, Min, TEXT_OID),
    same(2146, Min, NUMERIC_OID),
    same(2051, Min, ANYARRAY_OID),
    same(2245, Min, BPCHAR_OID),
    same(2798, Min, TID_OID),
    same(3527, Min, ANYENUM_OID),
    same(3565, Min, INET_OID),
    same(4190, Min, PG_LSN_OID),
];

/// The allow-list entry for an aggregate function, if it is supported.
pub fn lookup(fn_oid: Oid) -> Option<&'static AggregateEntry> {
    SUPPORTED_AGGREGATES.iter().find(|e| e.fn_oid == fn_oid)
}

/// Whether the aggregate can participate in incremental maintenance.
pub fn is_supported(fn_oid: Oid) -> bool {
    lookup(fn_oid).is_some()
}

/// Resolve the overload of `kind` that accepts `arg_types`.
///
/// `count` with no arguments is `count(*)`; with one argument of any type
/// it is `count("any")`. The other kinds need an exact input-type match.
pub fn resolve(kind: AggKind, arg_types: &[Oid]) -> Option<&'static AggregateEntry> {
    match (kind, arg_types) {
        (Count, []) => SUPPORTED_AGGREGATES.iter().find(|e| e.kind == Count && e.star),
        (Count, [_]) => SUPPORTED_AGGREGATES
            .iter()
            .find(|e| e.kind == Count && !e.star),
        (_, [input]) => SUPPORTED_AGGREGATES
            .iter()
            .find(|e| e.kind == kind && e.input_type == *input),
        _ => None,
    }
}
