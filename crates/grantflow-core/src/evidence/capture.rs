//! Cancellable evidence capture sessions.
//!
//! A [`CaptureDevice`] wraps the platform camera/location hardware. At
//! most one [`CaptureSession`] is in flight at a time: `begin_session`
//! parks on a `tokio::sync::Mutex` and the returned session holds the
//! owned guard, so the device is released deterministically on every exit
//! path — success, cancellation, or error — when the session drops.
//!
//! Location acquisition is bounded by a timeout; on failure the capture
//! proceeds without geotagging and the resulting evidence is permanently
//! unverified. Uploads retry transient object-store failures with a
//! bounded doubling backoff.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

use super::overlay::{PhotoFrame, stamp_frame};
use super::store::{ObjectStore, StoreError};
use super::{EvidenceError, EvidencePhoto, LocationError};
use crate::geo::{GeoPoint, verify_proximity};
use crate::now_ns;

/// Boxed future type for object-safe async traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Platform location provider.
///
/// Implementations resolve the device's current position or report why
/// they cannot. The timeout is applied by the caller, not the provider.
pub trait LocationProvider: Send + Sync {
    /// Resolves the device's current position.
    fn current_position(&self) -> BoxFuture<'_, Result<GeoPoint, LocationError>>;
}

/// Location provider returning a fixed outcome, for tests and simulators.
pub struct FixedLocationProvider {
    outcome: Result<GeoPoint, String>,
    delay: Duration,
}

impl FixedLocationProvider {
    /// Provider that always resolves to `point` immediately.
    #[must_use]
    pub const fn at(point: GeoPoint) -> Self {
        Self {
            outcome: Ok(point),
            delay: Duration::ZERO,
        }
    }

    /// Provider that always fails with `reason`.
    #[must_use]
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            outcome: Err(reason.into()),
            delay: Duration::ZERO,
        }
    }

    /// Adds an artificial resolution delay (to exercise the timeout path).
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl LocationProvider for FixedLocationProvider {
    fn current_position(&self) -> BoxFuture<'_, Result<GeoPoint, LocationError>> {
        Box::pin(async move {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            match &self.outcome {
                Ok(point) => Ok(*point),
                Err(reason) => Err(LocationError::Unavailable {
                    reason: reason.clone(),
                }),
            }
        })
    }
}

/// Tunables for the capture pipeline.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Bound on location acquisition.
    pub location_timeout: Duration,

    /// Site verification radius in metres.
    pub verification_radius_m: f64,

    /// Maximum upload attempts per evidence photo.
    pub upload_max_attempts: u32,

    /// Base backoff between upload attempts; doubles per retry.
    pub upload_backoff: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            location_timeout: Duration::from_secs(10),
            verification_radius_m: crate::geo::SITE_VERIFICATION_RADIUS_M,
            upload_max_attempts: 3,
            upload_backoff: Duration::from_millis(250),
        }
    }
}

/// Handle on the capture hardware shared by all would-be sessions.
pub struct CaptureDevice {
    gate: Arc<Mutex<()>>,
    provider: Arc<dyn LocationProvider>,
    store: Arc<dyn ObjectStore>,
    config: CaptureConfig,
}

impl CaptureDevice {
    /// Creates a device over the given provider and object store.
    #[must_use]
    pub fn new(
        provider: Arc<dyn LocationProvider>,
        store: Arc<dyn ObjectStore>,
        config: CaptureConfig,
    ) -> Self {
        Self {
            gate: Arc::new(Mutex::new(())),
            provider,
            store,
            config,
        }
    }

    /// Opens a capture session, waiting for any in-flight session to end.
    pub async fn begin_session(&self) -> CaptureSession {
        let guard = Arc::clone(&self.gate).lock_owned().await;
        CaptureSession {
            _device_guard: guard,
            provider: Arc::clone(&self.provider),
            store: Arc::clone(&self.store),
            config: self.config.clone(),
            location: None,
        }
    }

    /// Opens a capture session only if the device is idle.
    #[must_use]
    pub fn try_begin_session(&self) -> Option<CaptureSession> {
        let guard = Arc::clone(&self.gate).try_lock_owned().ok()?;
        Some(CaptureSession {
            _device_guard: guard,
            provider: Arc::clone(&self.provider),
            store: Arc::clone(&self.store),
            config: self.config.clone(),
            location: None,
        })
    }
}

/// One in-flight evidence capture.
///
/// Holds the device exclusively until dropped. No persistent state exists
/// until [`Self::attach_evidence`] returns; cancelling earlier leaves
/// nothing behind.
pub struct CaptureSession {
    _device_guard: OwnedMutexGuard<()>,
    provider: Arc<dyn LocationProvider>,
    store: Arc<dyn ObjectStore>,
    config: CaptureConfig,
    location: Option<GeoPoint>,
}

impl CaptureSession {
    /// Acquires the device location, bounded by the configured timeout.
    ///
    /// On failure the session keeps going without a fix; evidence attached
    /// afterwards is flagged unverified with no recorded distance, never
    /// silently treated as verified.
    ///
    /// # Errors
    ///
    /// Returns [`LocationError::Timeout`] when the provider does not
    /// resolve in time, or the provider's own error.
    pub async fn acquire_location(&mut self) -> Result<GeoPoint, LocationError> {
        let timeout = self.config.location_timeout;
        match tokio::time::timeout(timeout, self.provider.current_position()).await {
            Ok(Ok(point)) => {
                debug!(lat = point.latitude, lon = point.longitude, "location fix acquired");
                self.location = Some(point);
                Ok(point)
            },
            Ok(Err(err)) => {
                warn!(error = %err, "location provider failed; capture continues unverified");
                Err(err)
            },
            Err(_elapsed) => {
                #[allow(clippy::cast_possible_truncation)]
                let timeout_ms = timeout.as_millis() as u64;
                warn!(timeout_ms, "location acquisition timed out; capture continues unverified");
                Err(LocationError::Timeout { timeout_ms })
            },
        }
    }

    /// The fix acquired so far, if any.
    #[must_use]
    pub const fn location(&self) -> Option<GeoPoint> {
        self.location
    }

    /// Stamps and uploads a captured frame, producing immutable evidence.
    ///
    /// The proximity verification is computed here, from the fix this
    /// session acquired — a submitter-provided flag is never consulted.
    /// The stamped frame is encoded and uploaded with bounded retry on
    /// transient store failures.
    ///
    /// # Errors
    ///
    /// Returns [`EvidenceError::InvalidFrame`] for a malformed frame or
    /// [`EvidenceError::UploadFailure`] once retries are exhausted.
    pub async fn attach_evidence(
        &self,
        mut frame: PhotoFrame,
        site: GeoPoint,
    ) -> Result<EvidencePhoto, EvidenceError> {
        let captured_at_ns = now_ns();
        let verification =
            verify_proximity(self.location, site, self.config.verification_radius_m);

        stamp_frame(&mut frame, captured_at_ns, self.location, verification)?;
        let bytes = frame.to_ppm();

        let mut backoff = self.config.upload_backoff;
        let mut last_error: Option<StoreError> = None;
        let attempts = self.config.upload_max_attempts.max(1);

        for attempt in 1..=attempts {
            match self.store.put(&bytes) {
                Ok(object_ref) => {
                    debug!(object_ref = %object_ref.0, attempt, "evidence uploaded");
                    return Ok(EvidencePhoto {
                        object_ref,
                        captured_at_ns,
                        latitude: self.location.map(|p| p.latitude),
                        longitude: self.location.map(|p| p.longitude),
                        distance_to_site_m: verification.distance_m,
                        verified: verification.verified,
                    });
                },
                Err(err @ StoreError::Transient { .. }) => {
                    warn!(error = %err, attempt, "transient upload failure, retrying");
                    last_error = Some(err);
                    if attempt < attempts {
                        tokio::time::sleep(backoff).await;
                        backoff *= 2;
                    }
                },
                Err(err) => {
                    return Err(EvidenceError::UploadFailure {
                        attempts: attempt,
                        last_error: err,
                    });
                },
            }
        }

        Err(EvidenceError::UploadFailure {
            attempts,
            last_error: last_error.unwrap_or(StoreError::Transient {
                message: "upload never attempted".to_string(),
            }),
        })
    }

    /// Cancels the capture. Equivalent to dropping the session: the device
    /// is released and no partial state remains.
    pub fn cancel(self) {
        drop(self);
    }
}
