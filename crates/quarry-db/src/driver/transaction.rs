//! Transaction nesting state.
//!
//! Only the outermost level touches the physical connection. Inner
//! start/complete pairs adjust the depth counter and nothing else.

/// How a `trans_complete` call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionOutcome {
    /// The outermost level committed
    Committed,
    /// A failure was recorded and the outermost level rolled back
    RolledBack,
    /// An inner level closed; nothing reached the connection
    Nested,
    /// Transactions are switched off for this connection
    Disabled,
    /// No transaction was open
    Inactive,
}

impl TransactionOutcome {
    /// True unless the transaction rolled back.
    pub fn is_success(&self) -> bool {
        !matches!(self, TransactionOutcome::RolledBack)
    }
}

/// Depth counter and failure flag for one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionState {
    pub(crate) depth: u32,
    pub(crate) failed: bool,
    pub(crate) enabled: bool,
    /// A failure survives past the transaction group that recorded it
    pub(crate) strict: bool,
}

impl TransactionState {
    pub fn new(enabled: bool, strict: bool) -> Self {
        Self {
            depth: 0,
            failed: false,
            enabled,
            strict,
        }
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn failed(&self) -> bool {
        self.failed
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn strict(&self) -> bool {
        self.strict
    }

    /// Opens a level. Returns true when the caller must open the physical transaction.
    pub(crate) fn enter(&mut self, test_mode: bool) -> bool {
        if self.depth > 0 {
            self.depth += 1;
            return false;
        }
        self.failed = test_mode || (self.strict && self.failed);
        self.depth = 1;
        true
    }

    /// Closes a level. Returns the outcome the outermost level must apply.
    pub(crate) fn leave(&mut self) -> TransactionOutcome {
        match self.depth {
            0 => TransactionOutcome::Inactive,
            1 => {
                self.depth = 0;
                if self.failed {
                    if !self.strict {
                        self.failed = false;
                    }
                    TransactionOutcome::RolledBack
                } else {
                    TransactionOutcome::Committed
                }
            }
            _ => {
                self.depth -= 1;
                TransactionOutcome::Nested
            }
        }
    }

    pub(crate) fn mark_failed(&mut self) {
        if self.depth > 0 {
            self.failed = true;
        }
    }
}
