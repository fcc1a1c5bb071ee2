//! Geotagged photographic evidence: capture, stamping, and storage.
//!
//! Evidence is what ties a progress report to physical reality. A capture
//! session acquires the device location (bounded by a timeout), computes
//! the distance to the work site, burns a human-readable stamp into the
//! photo pixels, and uploads the stamped frame to content-addressed object
//! storage. The resulting [`EvidencePhoto`] is immutable and embedded in
//! exactly one progress report.
//!
//! # Fraud resistance
//!
//! Two properties hold regardless of what a client submits:
//!
//! 1. The proximity verification is computed at capture time from the
//!    acquired fix, and recomputed again by the daemon at report commit
//!    time from the stored coordinates. A client-claimed `verified` flag is
//!    never trusted.
//! 2. The stamp is pixel data, not metadata. Stripping EXIF or renaming the
//!    object does not remove the capture time, coordinates, or
//!    verification marker from the image.
//!
//! # Resource ownership
//!
//! The capture device (camera + location stream) is exclusively owned by
//! one in-flight [`CaptureSession`] at a time. The session holds an RAII
//! guard; dropping the session on any exit path (success, cancellation,
//! error) releases the device deterministically.

mod capture;
mod error;
mod overlay;
mod store;

#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};

pub use capture::{
    BoxFuture, CaptureConfig, CaptureDevice, CaptureSession, FixedLocationProvider,
    LocationProvider,
};
pub use error::{EvidenceError, LocationError};
pub use overlay::{PhotoFrame, stamp_frame};
pub use store::{MAX_PHOTO_SIZE, MemoryObjectStore, ObjectRef, ObjectStore, StoreError};

/// An immutable, geoverified evidence photo.
///
/// Created only by [`CaptureSession::attach_evidence`]; the daemon persists
/// it alongside the progress report it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidencePhoto {
    /// Durable reference to the stamped image in object storage.
    pub object_ref: ObjectRef,

    /// Nanoseconds since Unix epoch at capture.
    pub captured_at_ns: u64,

    /// Capture latitude in degrees, `None` when no fix was acquired.
    pub latitude: Option<f64>,

    /// Capture longitude in degrees, `None` when no fix was acquired.
    pub longitude: Option<f64>,

    /// Haversine distance to the site reference in metres, `None` when no
    /// fix was acquired.
    pub distance_to_site_m: Option<f64>,

    /// Whether the capture was strictly inside the verification radius.
    /// Always `false` when the location was unavailable.
    pub verified: bool,
}
