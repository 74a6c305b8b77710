//! Fixed-interval polling used to wait for remote state changes.
//!
//! The control plane offers no push notifications, so every wait is a loop of
//! "fetch, compare, sleep". [`poll_until`] is the primitive; the recreation
//! workflow layers its image, instance, and volume waits on top of
//! [`wait_for_status`].

use std::future::Future;
use std::time::Duration;

use log::debug;
use thiserror::Error;
use tokio::time::sleep;

/// Default delay between two status checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// How often to poll and when to give up.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PollPolicy {
    /// Delay between two checks. No backoff is applied.
    pub interval: Duration,
    /// Upper bound on the number of checks. `None` waits forever.
    pub max_attempts: Option<u32>,
}

impl PollPolicy {
    /// Creates an unbounded policy with the given interval.
    #[must_use]
    pub const fn new(interval: Duration) -> Self {
        Self {
            interval,
            max_attempts: None,
        }
    }

    /// Bounds the number of checks.
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

/// Errors raised while polling.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum PollError<E>
where
    E: std::error::Error + 'static,
{
    /// The status check itself failed.
    #[error("status check for {resource} failed: {source}")]
    Fetch {
        /// Resource being waited on.
        resource: String,
        /// Underlying error.
        #[source]
        source: E,
    },
    /// The attempt bound was reached before the condition held.
    #[error("{resource} did not reach {target} after {attempts} checks")]
    Exhausted {
        /// Resource being waited on.
        resource: String,
        /// Expected state.
        target: String,
        /// Number of checks performed.
        attempts: u32,
    },
}

/// Calls `check` until it returns `true`, sleeping `policy.interval` between
/// calls. Returns the number of checks performed.
///
/// # Errors
///
/// Returns [`PollError::Fetch`] as soon as `check` fails and
/// [`PollError::Exhausted`] once `policy.max_attempts` checks came back
/// `false`.
pub async fn poll_until<F, Fut, E>(
    policy: &PollPolicy,
    resource: &str,
    target: &str,
    mut check: F,
) -> Result<u32, PollError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, E>>,
    E: std::error::Error + 'static,
{
    let mut attempts = 0_u32;
    loop {
        attempts = attempts.saturating_add(1);
        let ready = check().await.map_err(|source| PollError::Fetch {
            resource: resource.to_owned(),
            source,
        })?;
        if ready {
            return Ok(attempts);
        }

        if policy.max_attempts.is_some_and(|max| attempts >= max) {
            return Err(PollError::Exhausted {
                resource: resource.to_owned(),
                target: target.to_owned(),
                attempts,
            });
        }

        debug!("waiting for {resource} to reach {target} (check {attempts})");
        sleep(policy.interval).await;
    }
}

/// Waits until every status returned by `fetch` equals `target`.
///
/// An empty status list counts as "not yet": the resource has not shown up in
/// the control plane's view.
///
/// # Errors
///
/// See [`poll_until`].
pub async fn wait_for_status<F, Fut, E>(
    policy: &PollPolicy,
    resource: &str,
    target: &str,
    mut fetch: F,
) -> Result<u32, PollError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Vec<String>, E>>,
    E: std::error::Error + 'static,
{
    poll_until(policy, resource, target, || {
        let pending = fetch();
        async move {
            let statuses = pending.await?;
            Ok::<bool, E>(!statuses.is_empty() && statuses.iter().all(|status| status == target))
        }
    })
    .await
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;

    #[derive(Debug, Error, Eq, PartialEq)]
    #[error("scripted fetch failure")]
    struct FetchFailure;

    fn fast_policy() -> PollPolicy {
        PollPolicy::new(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn returns_after_the_fetch_that_observes_the_target() {
        let script = Mutex::new(VecDeque::from(vec![
            vec![String::from("available")],
            vec![String::from("available")],
            vec![String::from("in-use")],
            vec![String::from("in-use")],
        ]));
        let fetches = Cell::new(0_u32);

        let attempts = wait_for_status(&fast_policy(), "vol-1", "in-use", || {
            fetches.set(fetches.get() + 1);
            let next = script
                .lock()
                .unwrap_or_else(|err| panic!("script lock poisoned: {err}"))
                .pop_front()
                .unwrap_or_default();
            async move { Ok::<_, FetchFailure>(next) }
        })
        .await
        .unwrap_or_else(|err| panic!("wait should succeed: {err}"));

        assert_eq!(attempts, 3);
        assert_eq!(fetches.get(), 3, "no fetch may happen after success");
    }

    #[tokio::test]
    async fn waits_for_every_resource() {
        let script = Mutex::new(VecDeque::from(vec![
            vec![String::from("stopped"), String::from("stopping")],
            vec![String::from("stopped"), String::from("stopped")],
        ]));

        let attempts = wait_for_status(&fast_policy(), "instances", "stopped", || {
            let next = script
                .lock()
                .unwrap_or_else(|err| panic!("script lock poisoned: {err}"))
                .pop_front()
                .unwrap_or_default();
            async move { Ok::<_, FetchFailure>(next) }
        })
        .await
        .unwrap_or_else(|err| panic!("wait should succeed: {err}"));

        assert_eq!(attempts, 2);
    }

    #[tokio::test]
    async fn empty_status_list_is_not_ready() {
        let result = wait_for_status(
            &fast_policy().with_max_attempts(3),
            "ami-1",
            "available",
            || async { Ok::<_, FetchFailure>(Vec::new()) },
        )
        .await;

        assert_eq!(
            result,
            Err(PollError::Exhausted {
                resource: String::from("ami-1"),
                target: String::from("available"),
                attempts: 3,
            })
        );
    }

    #[tokio::test]
    async fn fetch_errors_propagate_immediately() {
        let fetches = Cell::new(0_u32);
        let result = poll_until(&fast_policy(), "i-1", "running", || {
            fetches.set(fetches.get() + 1);
            async { Err::<bool, _>(FetchFailure) }
        })
        .await;

        assert!(
            matches!(result, Err(PollError::Fetch { ref source, .. }) if *source == FetchFailure),
            "unexpected result: {result:?}"
        );
        assert_eq!(fetches.get(), 1);
    }

    #[test]
    fn default_policy_polls_every_five_seconds_without_bound() {
        let policy = PollPolicy::default();
        assert_eq!(policy.interval, Duration::from_secs(5));
        assert_eq!(policy.max_attempts, None);
    }
}
