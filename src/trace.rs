//! Stage traces: diagnostic breadcrumbs threaded through every call level.
//!
//! A trace is a manually maintained call stack. Each remote-facing operation
//! enters a stage on the way in and pops it again when it returns cleanly,
//! so a failure leaves behind the path that led to it:
//!
//! ```text
//! campaign report -> fan-out -> work item 17 -> campaign detail -> POST
//! ```
//!
//! The trace also keeps the last request and response exchanged with a
//! remote service so the rendered message can show what was on the wire.

use std::fmt;

/// Separator between stages in a rendered path.
pub const STAGE_SEPARATOR: &str = " -> ";

/// I/O snapshots longer than this are cut when rendering.
const SNAPSHOT_LIMIT: usize = 512;

/// An ordered record of the stages a request passed through.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageTrace {
    stages: Vec<String>,
    /// A continuation marker trails the last stage: the next
    /// `set_last_stage` fills a new slot instead of replacing.
    open: bool,
    error: Option<String>,
    last_sent: Option<Vec<u8>>,
    last_received: Option<Vec<u8>>,
}

impl StageTrace {
    /// Start a trace whose first stage is `initial`, left open for sub-stages.
    pub fn new(initial: impl Into<String>) -> Self {
        let mut trace = Self::default();
        trace.enter_stage(initial);
        trace
    }

    /// Enter a sub-operation and mark a continuation point after it.
    ///
    /// The stage goes into the open slot. A finished sibling left behind by
    /// an earlier clean return is replaced rather than kept.
    pub fn enter_stage(&mut self, name: impl Into<String>) {
        self.set_last_stage(name);
        self.open = true;
    }

    /// Name the leaf stage.
    ///
    /// Fills the open continuation slot when there is one, otherwise
    /// replaces the last stage.
    pub fn set_last_stage(&mut self, name: impl Into<String>) {
        let name = name.into();
        if self.open {
            self.stages.push(name);
            self.open = false;
        } else if let Some(last) = self.stages.last_mut() {
            *last = name;
        } else {
            self.stages.push(name);
        }
    }

    /// Unwind one level after a sub-operation returned.
    ///
    /// Failures keep the trace untouched as the breadcrumb.
    pub fn pop_stage_on_success<T, E>(&mut self, result: &Result<T, E>) {
        if result.is_err() {
            return;
        }
        if self.open {
            self.open = false;
        } else {
            self.stages.pop();
        }
    }

    /// Close the trace at the end of a top-level operation.
    pub fn finalize<T, E: fmt::Display>(&mut self, result: &Result<T, E>, terminal: &str) {
        match result {
            Err(e) => self.error = Some(e.to_string()),
            Ok(_) => self.set_last_stage(terminal),
        }
        self.open = false;
    }

    /// Remember the last payloads exchanged with a remote service.
    pub fn record_io(&mut self, sent: &[u8], received: Option<&[u8]>) {
        self.last_sent = Some(sent.to_vec());
        self.last_received = received.map(<[u8]>::to_vec);
    }

    /// Remember the current depth so a later [`rewind`](Self::rewind) can drop
    /// everything entered since.
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            depth: self.stages.len(),
            open: self.open,
        }
    }

    /// Return to a previously taken checkpoint.
    pub fn rewind(&mut self, checkpoint: Checkpoint) {
        self.stages.truncate(checkpoint.depth);
        self.open = checkpoint.open;
    }

    /// Append another trace (typically a unit of work's local trace) to this one.
    pub fn absorb(&mut self, other: StageTrace) {
        self.stages.extend(other.stages);
        self.open = other.open;
        if other.error.is_some() {
            self.error = other.error;
        }
        if other.last_sent.is_some() || other.last_received.is_some() {
            self.last_sent = other.last_sent;
            self.last_received = other.last_received;
        }
    }

    #[cfg(test)]
    pub fn contains(&self, stage: &str) -> bool {
        self.stages.iter().any(|s| s == stage)
    }

    #[cfg(test)]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// The stage path, with a trailing separator while a continuation is open.
    pub fn path(&self) -> String {
        let mut path = self.stages.join(STAGE_SEPARATOR);
        if self.open && !path.is_empty() {
            path.push_str(STAGE_SEPARATOR);
        }
        path
    }

    /// Build the single diagnostic line shown to users.
    ///
    /// `<error> {es: <path>, rd: <received>, sd: <sent>}`, omitting
    /// whatever is absent.
    pub fn render_message(&self) -> String {
        let mut parts = Vec::new();

        let path = self.path();
        let path = path.trim_end_matches(STAGE_SEPARATOR);
        if !path.is_empty() {
            parts.push(format!("es: {path}"));
        }
        if let Some(received) = &self.last_received {
            parts.push(format!("rd: {}", snapshot(received)));
        }
        if let Some(sent) = &self.last_sent {
            parts.push(format!("sd: {}", snapshot(sent)));
        }

        let error = self.error.as_deref().unwrap_or("no error recorded");
        if parts.is_empty() {
            error.to_string()
        } else {
            format!("{error} {{{}}}", parts.join(", "))
        }
    }
}

/// A saved trace depth, see [`StageTrace::checkpoint`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    depth: usize,
    open: bool,
}

impl fmt::Display for StageTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

fn snapshot(bytes: &[u8]) -> String {
    if bytes.len() <= SNAPSHOT_LIMIT {
        return String::from_utf8_lossy(bytes).into_owned();
    }
    let mut text = String::from_utf8_lossy(&bytes[..SNAPSHOT_LIMIT]).into_owned();
    text.push_str(&format!("… ({} bytes total)", bytes.len()));
    text
}
