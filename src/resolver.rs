//! Channel resolution

use crate::error::Result;
use crate::session::Session;
use crate::types::{ChannelRef, ResolvedChannel};

/// Map a configured reference to a channel.
///
/// # Errors
/// [`crate::Error::ChannelNotFound`] when the service does not know the reference,
/// [`crate::Error::RateLimited`] when resolution stays throttled. A resolved channel may
/// still have unreadable history.
pub async fn resolve(session: &Session, reference: &ChannelRef) -> Result<ResolvedChannel> {
    let backend = session.backend();
    let token = session.token();
    let channel = session
        .call("resolve_channel", || async move {
            backend.resolve_channel(token, reference).await
        })
        .await?;

    tracing::debug!(
        channel = %reference,
        id = %channel.id,
        title = %channel.title,
        "channel resolved"
    );
    Ok(channel)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::test_helpers::{FakeBackend, Fault, Op, connected_session};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn resolves_any_reference_form() {
        let backend = Arc::new(FakeBackend::new().with_text_channel("DoctorsET", "Doctors Ethiopia", 3));
        let (_m, session) = connected_session(backend).await;

        for form in ["@DoctorsET", "DoctorsET", "https://t.me/DoctorsET"] {
            let reference = ChannelRef::parse(form);
            let channel = resolve(&session, &reference).await.unwrap();
            assert_eq!(channel.title, "Doctors Ethiopia");
            assert_eq!(channel.reference.original(), form, "keeps configured text");
        }
    }

    #[tokio::test]
    async fn unknown_reference_is_channel_not_found() {
        let backend = Arc::new(FakeBackend::new());
        let (_m, session) = connected_session(backend.clone()).await;

        let err = resolve(&session, &ChannelRef::parse("@ghost")).await.unwrap_err();

        match err {
            Error::ChannelNotFound { reference } => assert_eq!(reference, "@ghost"),
            other => panic!("expected channel not found, got {other:?}"),
        }
        assert_eq!(backend.calls(Op::Resolve), 1, "not-found is not retried");
    }

    #[tokio::test]
    async fn persistent_throttling_is_rate_limit_error() {
        let backend = Arc::new(FakeBackend::new().with_text_channel("busy", "Busy", 1));
        let (_m, session) = connected_session(backend.clone()).await;
        backend.fail_always(Op::Resolve, Fault::RateLimited(Duration::from_secs(3600)));

        let err = resolve(&session, &ChannelRef::parse("@busy")).await.unwrap_err();
        assert!(matches!(err, Error::RateLimited { .. }), "got {err:?}");
    }
}
