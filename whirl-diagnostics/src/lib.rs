//! The accumulating diagnostic sink shared by every front-end phase.
//!
//! Non-fatal errors pile up here so that one compilation reports as many
//! problems as possible; phases consult [`DiagnosticSink::can_proceed`] and
//! [`DiagnosticSink::should_proceed`] between batches to decide whether the
//! next phase is worth running at all.

use std::{cell::RefCell, io, path::PathBuf, rc::Rc};

use whirl_utils::{PackageId, Span};

/// The class an error belongs to. This is surfaced to the user next to the
/// message and is also what the tests assert on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    /// Invalid, duplicate, or undefined names.
    Name,
    /// A known symbol used in a way its definition does not permit.
    Usage,
    /// Import statement and cross-package visibility errors.
    Import,
    /// Unification, coercion, and unsolved-equation errors.
    Type,
}

impl std::fmt::Display for Category {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        let name = match self {
            Category::Name => "Name",
            Category::Usage => "Usage",
            Category::Import => "Import",
            Category::Type => "Type",
        };
        write!(f, "{name}")
    }
}

/// Where an error should be attributed: the package and file the front-end
/// was working on when the error was produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogContext {
    pub package: Option<PackageId>,
    pub file:    Option<PathBuf>,
}

impl LogContext {
    pub fn new(
        package: PackageId,
        file: impl Into<PathBuf>,
    ) -> Self {
        Self {
            package: Some(package),
            file:    Some(file.into()),
        }
    }
}

/// One accumulated structured error.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub message:  String,
    pub category: Category,
    pub span:     Span,
    pub context:  LogContext,
}

#[derive(Default)]
struct SinkState {
    diagnostics: Vec<Diagnostic>,
    io_errors:   Vec<String>,
    fatal:       Option<String>,
    context:     LogContext,
    checkpoint:  usize,
}

impl SinkState {
    fn error_count(&self) -> usize {
        self.diagnostics.len() + self.io_errors.len()
    }
}

/// The process-wide error accumulator. Single-writer; interior mutability so
/// one handle can be shared by the compiler, every walker, and every solver.
#[derive(Default)]
pub struct DiagnosticSink {
    state: RefCell<SinkState>,
}

pub type SharedSink = Rc<DiagnosticSink>;

impl DiagnosticSink {
    pub fn new() -> SharedSink {
        Rc::new(Self::default())
    }

    /// Appends a structured error attributed to the sink's current context.
    pub fn log_error(
        &self,
        message: impl Into<String>,
        category: Category,
        span: Span,
    ) {
        let mut state = self.state.borrow_mut();
        let context = state.context.clone();
        self.push(&mut state, message.into(), category, span, context);
    }

    /// Appends a structured error with explicit attribution, for callers
    /// (walkers, solvers) that outlive the ambient context.
    pub fn log_error_in(
        &self,
        context: &LogContext,
        message: impl Into<String>,
        category: Category,
        span: Span,
    ) {
        let mut state = self.state.borrow_mut();
        self.push(&mut state, message.into(), category, span, context.clone());
    }

    fn push(
        &self,
        state: &mut SinkState,
        message: String,
        category: Category,
        span: Span,
        context: LogContext,
    ) {
        tracing::debug!(%category, message = %message, "diagnostic");
        state.diagnostics.push(Diagnostic {
            message,
            category,
            span,
            context,
        });
    }

    /// Appends a raw I/O error (scan failures, unreadable paths). These are
    /// never propagated; the phase keeps going.
    pub fn log_io_error(
        &self,
        err: io::Error,
    ) {
        let mut state = self.state.borrow_mut();
        let rendered = match &state.context.file {
            Some(path) => format!("{}: {err}", path.display()),
            None => err.to_string(),
        };
        tracing::debug!(error = %rendered, "io error");
        state.io_errors.push(rendered);
    }

    /// Records an unrecoverable condition. The front-end stops after the
    /// current phase; the driver turns this into a process abort.
    pub fn log_fatal(
        &self,
        message: impl Into<String>,
    ) {
        let message = message.into();
        tracing::error!(message = %message, "fatal");
        let mut state = self.state.borrow_mut();
        if state.fatal.is_none() {
            state.fatal = Some(message);
        }
    }

    /// Swaps the current attribution context, returning a guard that restores
    /// the previous one when dropped. Recursive imports rely on this firing
    /// on every exit path.
    pub fn swap_context(
        &self,
        context: LogContext,
    ) -> ContextGuard<'_> {
        let prev = std::mem::replace(&mut self.state.borrow_mut().context, context);
        ContextGuard { sink: self, prev: Some(prev) }
    }

    /// Points the current context at a different file within the same package.
    pub fn set_current_file(
        &self,
        file: impl Into<PathBuf>,
    ) {
        self.state.borrow_mut().context.file = Some(file.into());
    }

    pub fn current_context(&self) -> LogContext {
        self.state.borrow().context.clone()
    }

    /// Marks the start of a batch; `can_proceed` reports on errors logged
    /// since the most recent checkpoint.
    pub fn checkpoint(&self) {
        let mut state = self.state.borrow_mut();
        state.checkpoint = state.error_count();
    }

    /// True when the batch since the last checkpoint produced no errors.
    pub fn can_proceed(&self) -> bool {
        let state = self.state.borrow();
        state.fatal.is_none() && state.error_count() == state.checkpoint
    }

    /// True when the whole compilation so far is clean enough for the next
    /// phase to run.
    pub fn should_proceed(&self) -> bool {
        let state = self.state.borrow();
        state.fatal.is_none() && state.error_count() == 0
    }

    pub fn fatal(&self) -> Option<String> {
        self.state.borrow().fatal.clone()
    }

    pub fn error_count(&self) -> usize {
        self.state.borrow().error_count()
    }

    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.state.borrow().diagnostics.clone()
    }

    pub fn io_errors(&self) -> Vec<String> {
        self.state.borrow().io_errors.clone()
    }
}

/// Restores the sink's previous [`LogContext`] on drop.
pub struct ContextGuard<'a> {
    sink: &'a DiagnosticSink,
    prev: Option<LogContext>,
}

impl Drop for ContextGuard<'_> {
    fn drop(&mut self) {
        if let Some(prev) = self.prev.take() {
            self.sink.state.borrow_mut().context = prev;
        }
    }
}
