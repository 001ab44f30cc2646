//! Live per-symbol price dashboard.
//!
//! Wires the hub session, the subscription registry and the quote client
//! behind a single controller task:
//! - User intent (add/remove keys) arrives as commands
//! - Price pushes arrive as session events
//! - Rendering goes through the `Presenter` trait

pub mod app;
pub mod command;
pub mod config;
pub mod controller;
pub mod error;
pub mod presenter;

pub use app::Application;
pub use command::{Command, CommandError};
pub use config::AppConfig;
pub use controller::DashboardController;
pub use error::{AppError, AppResult};
pub use presenter::{Notice, Presenter, PresenterEvent, RecordingPresenter, TracingPresenter};
