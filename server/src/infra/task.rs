//! Background task helpers

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tokio::task::JoinHandle;
use tracing::{error, Instrument, Span};

/// Spawn a detached task nobody will await.
///
/// A panic inside `fut` is caught and logged under `name`; it never reaches
/// the runtime or any caller.
pub fn spawn_supervised<F>(name: &'static str, span: Span, fut: F) -> JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(
        async move {
            if let Err(panic) = AssertUnwindSafe(fut).catch_unwind().await {
                error!(task = name, "Background task panicked: {}", panic_message(&panic));
            }
        }
        .instrument(span),
    )
}

fn panic_message(panic: &Box<dyn Any + Send>) -> &str {
    if let Some(msg) = panic.downcast_ref::<&'static str>() {
        msg
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "unknown panic payload"
    }
}
