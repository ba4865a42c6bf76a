//! Transaction context threaded through view creation.
//!
//! Every creation step runs inside one host transaction. [`Transaction`]
//! carries the catalog handle, the settings, the current command id and the
//! notices raised so far. Steps that change the catalog call
//! [`Transaction::advance`] so the steps after them observe the change.

use std::fmt;

use tracing::{debug, info};

use crate::catalog::{Catalog, CommandId};
use crate::config::ImmvConfig;

/// An informational message for the client. Never an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub message: String,
    pub detail: Option<String>,
    pub hint: Option<String>,
}

impl Notice {
    pub fn new(message: impl Into<String>) -> Self {
        Notice {
            message: message.into(),
            detail: None,
            hint: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NOTICE:  {}", self.message)?;
        if let Some(detail) = &self.detail {
            write!(f, "\nDETAIL:  {detail}")?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\nHINT:  {hint}")?;
        }
        Ok(())
    }
}

/// Explicit per-transaction state for one creation sequence.
pub struct Transaction<'a> {
    catalog: &'a mut dyn Catalog,
    config: &'a ImmvConfig,
    command_id: CommandId,
    notices: Vec<Notice>,
}

impl<'a> Transaction<'a> {
    pub fn new(catalog: &'a mut dyn Catalog, config: &'a ImmvConfig) -> Self {
        Transaction {
            catalog,
            config,
            command_id: 0,
            notices: Vec::new(),
        }
    }

    pub fn catalog(&self) -> &dyn Catalog {
        &*self.catalog
    }

    pub fn catalog_mut(&mut self) -> &mut dyn Catalog {
        &mut *self.catalog
    }

    pub fn config(&self) -> &'a ImmvConfig {
        self.config
    }

    pub fn command_id(&self) -> CommandId {
        self.command_id
    }

    /// Make every catalog change so far visible to subsequent steps.
    pub fn advance(&mut self) {
        self.command_id += 1;
        debug!(command_id = self.command_id, "advancing command counter");
        self.catalog.command_counter_increment(self.command_id);
    }

    /// Raise a notice to the client.
    pub fn notice(&mut self, notice: Notice) {
        info!(detail = ?notice.detail, hint = ?notice.hint, "{}", notice.message);
        self.notices.push(notice);
    }

    pub fn notices(&self) -> &[Notice] {
        &self.notices
    }

    /// Hand the collected notices to the caller.
    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }
}
