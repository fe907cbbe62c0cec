//! Outbound request modifiers.

use std::sync::Arc;

use gatehouse_auth::AuthGateway;

/// Mutates an outbound request before it is sent upstream.
///
/// Modifiers run in registration order and the first error aborts the
/// request. An error carrying a [`StatusError`](crate::error::StatusError)
/// anywhere in its chain is reported with that status.
pub type Modifier = Arc<dyn Fn(&mut reqwest::Request) -> anyhow::Result<()> + Send + Sync>;

/// Wraps a closure as a [`Modifier`].
pub fn modifier<F>(f: F) -> Modifier
where
    F: Fn(&mut reqwest::Request) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Moves the session cookie of the inbound request into the `Authorization`
/// header of the outbound one.
pub fn session_header(gateway: Arc<AuthGateway>) -> Modifier {
    modifier(move |req| {
        gateway.modify_header(req.headers_mut())?;
        Ok(())
    })
}

/// Applies `modifiers` in order, stopping at the first error.
pub fn apply(modifiers: &[Modifier], req: &mut reqwest::Request) -> anyhow::Result<()> {
    for modify in modifiers {
        modify(req)?;
    }
    Ok(())
}
