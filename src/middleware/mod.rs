//! Built-in middleware.
//!
//! Interceptors (two-phase, composed by a [`Stack`](crate::Stack)):
//!
//! - [`RequestLogger`]: per-exchange [`TaggedLogger`], start/completion lines
//! - [`ParamsParser`]: decodes request bodies into [`Params`]
//! - [`QueryCache`]: query cache on for the exchange, restored afterwards
//! - [`LocalCache`]: a fresh [`LocalStore`] per exchange
//! - [`LoadInterlock`]: counts in-flight exchanges for code reloading
//!
//! Wrapping endpoints (own the layer inside them):
//!
//! - [`ShowExceptions`]: renders failures through an exceptions app, with a
//!   fixed last-resort 500
//! - [`Static`]: serves files from a directory, falls through otherwise
//!
//! [`PublicExceptions`] is the usual exceptions app: static error pages from
//! a public directory.

mod exception_wrapper;
mod load_interlock;
mod local_cache;
pub(crate) mod logger;
mod params_parser;
mod public_exceptions;
mod query_cache;
mod show_exceptions;
mod static_files;

pub use exception_wrapper::{BacktraceCleaner, ExceptionWrapper, Rescues};
pub use load_interlock::{Interlock, LoadInterlock};
pub use local_cache::{LocalCache, LocalCacheRegistry, LocalStore};
pub use logger::{RequestLogger, TaggedLogger, Tagger, compute_tags};
pub use params_parser::{Params, ParamsParser, ParserFn, parse_json, request_parameters};
pub use public_exceptions::{ErrorBody, PublicExceptions, Rendered};
pub use query_cache::{QueryCache, QueryCacheConnection};
pub use show_exceptions::{FAILSAFE_BODY, ShowExceptions, X_CASCADE, failsafe_response};
pub use static_files::{FileHandler, Static, clean_path_info, escape_path, unescape_path};
