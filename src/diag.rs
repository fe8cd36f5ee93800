//! # Diagnostics
//!
//! Allocators in this crate never panic over a caller mistake. Exhaustion shows
//! up as a null atom, logic errors (double free, corrupted free chain, duplicate
//! trie key) become no-ops, and both are reported here.
//!
//! Every report is emitted as a `tracing` event. An arena may additionally carry
//! a user hook, installed with `ArenaBuilder::diagnostics`, that receives the
//! structured [`Diagnostic`]:
//!
//! ```ignore
//! let arena = Arena::builder()
//!     .diagnostics(|d: &Diagnostic| eprintln!("parrotdb: {d}"))
//!     .open()?;
//! ```

use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    /// Arena, page table or address space ran out.
    Exhausted,
    /// Persistent data failed validation.
    Format,
    /// Caller misuse that was ignored.
    Logic,
    /// A system call failed.
    Os,
}

impl DiagnosticKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DiagnosticKind::Exhausted => "exhausted",
            DiagnosticKind::Format => "format",
            DiagnosticKind::Logic => "logic",
            DiagnosticKind::Os => "os",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
    pub errno: Option<i32>,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.message)?;
        if let Some(errno) = self.errno {
            write!(f, " (errno {})", errno)?;
        }
        Ok(())
    }
}

pub type DiagnosticHook = Arc<dyn Fn(&Diagnostic) + Send + Sync>;

/// Reporting channel owned by an arena and shared by every pool on it.
#[derive(Clone, Default)]
pub struct Diagnostics {
    hook: Option<DiagnosticHook>,
}

impl fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Diagnostics")
            .field("hook", &self.hook.is_some())
            .finish()
    }
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hook(hook: DiagnosticHook) -> Self {
        Self { hook: Some(hook) }
    }

    pub fn report(&self, kind: DiagnosticKind, message: impl Into<String>) {
        self.emit(Diagnostic {
            kind,
            message: message.into(),
            errno: None,
        });
    }

    pub fn report_os(&self, message: impl Into<String>, err: &std::io::Error) {
        self.emit(Diagnostic {
            kind: DiagnosticKind::Os,
            message: format!("{}: {}", message.into(), err),
            errno: err.raw_os_error(),
        });
    }

    pub fn exhausted(&self, message: impl Into<String>) {
        self.report(DiagnosticKind::Exhausted, message);
    }

    pub fn logic(&self, message: impl Into<String>) {
        self.report(DiagnosticKind::Logic, message);
    }

    pub fn format(&self, message: impl Into<String>) {
        self.report(DiagnosticKind::Format, message);
    }

    fn emit(&self, diag: Diagnostic) {
        match diag.kind {
            DiagnosticKind::Format | DiagnosticKind::Os => {
                tracing::error!(kind = diag.kind.as_str(), errno = ?diag.errno, "{}", diag.message)
            }
            DiagnosticKind::Exhausted | DiagnosticKind::Logic => {
                tracing::warn!(kind = diag.kind.as_str(), "{}", diag.message)
            }
        }

        if let Some(hook) = &self.hook {
            hook(&diag);
        }
    }
}
