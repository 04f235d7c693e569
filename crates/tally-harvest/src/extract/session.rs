//! Session-scoped extraction
//!
//! [`SessionExtractor`] opens a fresh [`Session`] for every call, bounds the
//! work by the call's timeout and awaits [`Session::close`] on every path out,
//! including timeouts and a panicking `extract`. Only cancellation of the whole
//! call skips `close`, so sessions must also release their resources on `Drop`.

use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::Extractor;
use crate::types::{EntityKey, ExtractionResult, Failure, FailureKind};

/// One authenticated remote session
///
/// Implementations must release the remote resource on `Drop` too: a call
/// cancelled from outside never reaches `close`.
#[async_trait]
pub trait Session: Send {
    async fn extract(&mut self, key: &EntityKey) -> Result<ExtractionResult, Failure>;

    /// Release the remote resource; must not fail
    async fn close(&mut self);
}

/// Opens sessions, e.g. by logging in as `key`
#[async_trait]
pub trait SessionFactory: Send + Sync {
    type Session: Session;

    async fn open(&self, key: &EntityKey) -> Result<Self::Session, Failure>;
}

pub struct SessionExtractor<F> {
    factory: F,
}

impl<F: SessionFactory> SessionExtractor<F> {
    pub fn new(factory: F) -> Self {
        Self { factory }
    }
}

#[async_trait]
impl<F: SessionFactory> Extractor for SessionExtractor<F> {
    async fn fetch(&self, key: &EntityKey, timeout: Duration) -> Result<ExtractionResult, Failure> {
        let deadline = Instant::now() + timeout;

        let mut session = match tokio::time::timeout_at(deadline, self.factory.open(key)).await {
            Ok(opened) => opened?,
            Err(_) => {
                return Err(Failure::timeout(format!(
                    "session not opened within {}ms",
                    timeout.as_millis()
                )))
            },
        };

        let extract = AssertUnwindSafe(session.extract(key)).catch_unwind();
        let result = match tokio::time::timeout_at(deadline, extract).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Failure::new(FailureKind::Aborted, "session panicked during extraction")),
            Err(_) => Err(Failure::timeout(format!(
                "no record within {}ms",
                timeout.as_millis()
            ))),
        };

        session.close().await;

        match &result {
            Ok(_) => debug!(key = %key, "Session closed after extraction"),
            Err(failure) => warn!(key = %key, kind = %failure.kind, "Session closed after failure"),
        }
        result
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::types::FieldRecord;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Clone, Copy)]
    enum Behaviour {
        Succeed,
        Hang,
        Reject,
        RefuseLogin,
        Panic,
    }

    #[derive(Default)]
    struct Counters {
        opened: AtomicU32,
        closed: AtomicU32,
    }

    struct FakeSession {
        behaviour: Behaviour,
        counters: Arc<Counters>,
    }

    #[async_trait]
    impl Session for FakeSession {
        async fn extract(&mut self, _key: &EntityKey) -> Result<ExtractionResult, Failure> {
            match self.behaviour {
                Behaviour::Succeed => ExtractionResult::from_fields(
                    vec![FieldRecord {
                        name: "Total".to_string(),
                        held_count: 10,
                        attended_count: 9,
                        percentage: 90.0,
                    }],
                    None,
                ),
                Behaviour::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Err(Failure::remote("unreachable"))
                },
                Behaviour::Reject => Err(Failure::parse("attendance table missing")),
                Behaviour::RefuseLogin => Err(Failure::auth("unexpected")),
                Behaviour::Panic => panic!("attendance table selector changed"),
            }
        }

        async fn close(&mut self) {
            self.counters.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct FakeFactory {
        behaviour: Behaviour,
        counters: Arc<Counters>,
    }

    #[async_trait]
    impl SessionFactory for FakeFactory {
        type Session = FakeSession;

        async fn open(&self, _key: &EntityKey) -> Result<FakeSession, Failure> {
            if let Behaviour::RefuseLogin = self.behaviour {
                return Err(Failure::auth("invalid credentials"));
            }
            self.counters.opened.fetch_add(1, Ordering::SeqCst);
            Ok(FakeSession {
                behaviour: self.behaviour,
                counters: Arc::clone(&self.counters),
            })
        }
    }

    fn extractor(behaviour: Behaviour) -> (SessionExtractor<FakeFactory>, Arc<Counters>) {
        let counters = Arc::new(Counters::default());
        let factory = FakeFactory {
            behaviour,
            counters: Arc::clone(&counters),
        };
        (SessionExtractor::new(factory), counters)
    }

    #[tokio::test]
    async fn test_success_closes_session() {
        let (extractor, counters) = extractor(Behaviour::Succeed);
        let result = extractor.fetch(&"K1".into(), Duration::from_secs(5)).await.unwrap();

        assert_eq!(result.summary.percentage, 90.0);
        assert_eq!(counters.opened.load(Ordering::SeqCst), 1);
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_still_closes_session() {
        let (extractor, counters) = extractor(Behaviour::Hang);
        let err = extractor.fetch(&"K1".into(), Duration::from_secs(10)).await.unwrap_err();

        assert_eq!(err.kind, FailureKind::Timeout);
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_closes_session() {
        let (extractor, counters) = extractor(Behaviour::Reject);
        let err = extractor.fetch(&"K1".into(), Duration::from_secs(5)).await.unwrap_err();

        assert_eq!(err.kind, FailureKind::Parse);
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_panicking_extract_still_closes_session() {
        let (extractor, counters) = extractor(Behaviour::Panic);
        let err = extractor.fetch(&"K1".into(), Duration::from_secs(5)).await.unwrap_err();

        assert_eq!(err.kind, FailureKind::Aborted);
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_login_failure_opens_nothing() {
        let (extractor, counters) = extractor(Behaviour::RefuseLogin);
        let err = extractor.fetch(&"K1".into(), Duration::from_secs(5)).await.unwrap_err();

        assert_eq!(err.kind, FailureKind::Auth);
        assert_eq!(counters.opened.load(Ordering::SeqCst), 0);
        assert_eq!(counters.closed.load(Ordering::SeqCst), 0);
    }
}
