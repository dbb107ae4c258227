/// Mutable state of a run, owned by the run controller and lent to the
/// pipeline and the compensator.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunState {
    /// Accounts concluded with a non-fatal outcome.
    pub processed_count: u64,
    /// Accounts considered, including ones skipped via the checkpoint.
    pub total_seen: u64,
    pub current_account: Option<String>,
    /// Temporary account awaiting deletion. Set before the first mutating
    /// call for an account, cleared only by cleanup.
    pub current_recovery_account: Option<String>,
    pub stopped: bool,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_account(&mut self, account: &str) {
        self.current_account = Some(account.to_string());
    }

    pub fn end_account(&mut self) {
        self.current_account = None;
    }
}
