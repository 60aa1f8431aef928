//! Fleet teardown sweep.
//!
//! The reaper lists every droplet visible to the caller's credentials and
//! destroys each one sequentially, in listing order, printing one result
//! line per droplet. A destroy failure is recorded and the sweep carries on
//! to the next droplet; only a listing failure aborts.

use std::io::Write;

use thiserror::Error;

use crate::provider::Provider;

/// Summary of a teardown sweep.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SweepSummary {
    /// Number of droplets destroyed during the sweep.
    pub destroyed: usize,
    /// Number of droplets whose destruction failed.
    pub failed: usize,
}

/// Errors returned by the reaper.
#[derive(Debug, Error)]
pub enum ReapError<E>
where
    E: std::error::Error + 'static,
{
    /// Raised when the droplet listing cannot be fetched.
    #[error("failed to list droplets: {0}")]
    List(#[source] E),
}

/// Destroys every droplet the provider credentials can see.
#[derive(Clone, Debug)]
pub struct Reaper<P> {
    provider: P,
}

impl<P: Provider> Reaper<P> {
    /// Creates a new reaper over the given provider.
    #[must_use]
    pub const fn new(provider: P) -> Self {
        Self { provider }
    }

    /// Performs the sweep, writing one result line per droplet to `out`.
    ///
    /// # Errors
    ///
    /// Returns [`ReapError::List`] when the initial listing fails. Destroy
    /// failures are counted in the summary instead of aborting.
    pub async fn sweep(&self, out: &mut impl Write) -> Result<SweepSummary, ReapError<P::Error>> {
        let handles = self.provider.list().await.map_err(ReapError::List)?;

        let mut destroyed = 0_usize;
        let mut failed = 0_usize;
        for handle in &handles {
            match self.provider.destroy(handle).await {
                Ok(()) => {
                    writeln!(out, "Destroyed {} ({})", handle.name, handle.id).ok();
                    destroyed += 1;
                }
                Err(err) => {
                    writeln!(out, "Failed to destroy {} ({}): {err}", handle.name, handle.id).ok();
                    failed += 1;
                }
            }
        }

        Ok(SweepSummary { destroyed, failed })
    }
}
