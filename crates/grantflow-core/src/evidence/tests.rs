//! Tests for evidence capture, stamping, and storage.

use std::sync::Arc;
use std::time::Duration;

use super::store::FlakyObjectStore;
use super::*;
use crate::geo::{GeoPoint, SITE_VERIFICATION_RADIUS_M, SiteVerification};

fn site() -> GeoPoint {
    GeoPoint::new(25.3176, 82.9739).unwrap()
}

fn device_at(point: GeoPoint) -> CaptureDevice {
    CaptureDevice::new(
        Arc::new(FixedLocationProvider::at(point)),
        Arc::new(MemoryObjectStore::new()),
        CaptureConfig::default(),
    )
}

#[test]
fn test_object_store_round_trip_and_dedup() {
    let store = MemoryObjectStore::new();
    let first = store.put(b"photo bytes").unwrap();
    let second = store.put(b"photo bytes").unwrap();
    assert_eq!(first, second);
    assert_eq!(store.len(), 1);
    assert_eq!(store.get(&first).unwrap(), b"photo bytes");
}

#[test]
fn test_object_store_rejects_empty_and_oversized() {
    let store = MemoryObjectStore::new();
    assert!(matches!(store.put(b""), Err(StoreError::EmptyContent)));

    let small = MemoryObjectStore::with_max_size(8);
    assert!(matches!(
        small.put(b"0123456789"),
        Err(StoreError::StorageFull { .. })
    ));
}

#[test]
fn test_object_store_missing_ref() {
    let store = MemoryObjectStore::new();
    let missing = ObjectRef::for_bytes(b"never stored");
    assert!(!store.exists(&missing));
    assert!(matches!(
        store.get(&missing),
        Err(StoreError::NotFound { .. })
    ));
}

#[test]
fn test_stamp_darkens_banner_and_draws_text() {
    let mut frame = PhotoFrame::solid(320, 240, [200, 200, 200]);
    let verification = SiteVerification {
        distance_m: Some(120.0),
        verified: true,
    };
    stamp_frame(&mut frame, 1_700_000_000_000_000_000, Some(site()), verification).unwrap();

    // The bottom rows were darkened from 200 to 50, and glyph pixels were
    // painted white, so the banner region now has both values.
    let row_bytes = 320usize * 3;
    let banner = &frame.pixels[frame.pixels.len() - 20 * row_bytes..];
    assert!(banner.contains(&50));
    assert!(banner.contains(&0xFF));

    // The top of the frame is untouched.
    assert!(frame.pixels[..10 * row_bytes].iter().all(|&b| b == 200));
}

#[test]
fn test_stamp_rejects_malformed_frame() {
    let mut frame = PhotoFrame {
        width: 100,
        height: 100,
        pixels: vec![0; 17],
    };
    let err = stamp_frame(&mut frame, 0, None, SiteVerification::UNAVAILABLE).unwrap_err();
    assert!(matches!(err, EvidenceError::InvalidFrame { .. }));
}

#[test]
fn test_ppm_encoding_prefixes_header() {
    let frame = PhotoFrame::solid(2, 2, [1, 2, 3]);
    let bytes = frame.to_ppm();
    assert!(bytes.starts_with(b"P6\n2 2\n255\n"));
    assert_eq!(bytes.len(), b"P6\n2 2\n255\n".len() + 12);
}

#[tokio::test]
async fn test_capture_verified_when_near_site() {
    let near = GeoPoint::new(25.3187, 82.9739).unwrap(); // ~120 m north
    let device = device_at(near);

    let mut session = device.begin_session().await;
    session.acquire_location().await.unwrap();

    let photo = session
        .attach_evidence(PhotoFrame::solid(320, 240, [90, 90, 90]), site())
        .await
        .unwrap();

    assert!(photo.verified);
    let d = photo.distance_to_site_m.unwrap();
    assert!(d < SITE_VERIFICATION_RADIUS_M, "got {d}");
    assert_eq!(photo.latitude, Some(near.latitude));
    assert!(photo.captured_at_ns > 0);
}

#[tokio::test]
async fn test_capture_without_fix_is_unverified() {
    let device = CaptureDevice::new(
        Arc::new(FixedLocationProvider::unavailable("gps disabled")),
        Arc::new(MemoryObjectStore::new()),
        CaptureConfig::default(),
    );

    let mut session = device.begin_session().await;
    let err = session.acquire_location().await.unwrap_err();
    assert!(matches!(err, LocationError::Unavailable { .. }));

    // Capture still proceeds - flagged unverified, distance absent.
    let photo = session
        .attach_evidence(PhotoFrame::solid(64, 64, [0, 0, 0]), site())
        .await
        .unwrap();
    assert!(!photo.verified);
    assert!(photo.distance_to_site_m.is_none());
    assert!(photo.latitude.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_location_timeout_maps_to_typed_error() {
    let slow = FixedLocationProvider::at(site()).with_delay(Duration::from_secs(60));
    let device = CaptureDevice::new(
        Arc::new(slow),
        Arc::new(MemoryObjectStore::new()),
        CaptureConfig {
            location_timeout: Duration::from_secs(10),
            ..CaptureConfig::default()
        },
    );

    let mut session = device.begin_session().await;
    let err = session.acquire_location().await.unwrap_err();
    assert!(matches!(err, LocationError::Timeout { timeout_ms: 10_000 }));
    assert!(session.location().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_upload_retries_transient_failures() {
    let device = CaptureDevice::new(
        Arc::new(FixedLocationProvider::at(site())),
        Arc::new(FlakyObjectStore::failing(2)),
        CaptureConfig::default(),
    );

    let mut session = device.begin_session().await;
    session.acquire_location().await.unwrap();

    // Two injected failures, three attempts allowed: succeeds on the third.
    let photo = session
        .attach_evidence(PhotoFrame::solid(32, 32, [10, 10, 10]), site())
        .await
        .unwrap();
    assert!(photo.verified);
}

#[tokio::test(start_paused = true)]
async fn test_upload_exhaustion_surfaces_upload_failure() {
    let device = CaptureDevice::new(
        Arc::new(FixedLocationProvider::at(site())),
        Arc::new(FlakyObjectStore::failing(10)),
        CaptureConfig::default(),
    );

    let mut session = device.begin_session().await;
    session.acquire_location().await.unwrap();

    let err = session
        .attach_evidence(PhotoFrame::solid(32, 32, [10, 10, 10]), site())
        .await
        .unwrap_err();
    assert!(matches!(err, EvidenceError::UploadFailure { attempts: 3, .. }));
}

#[tokio::test]
async fn test_device_is_exclusive_until_session_ends() {
    let device = device_at(site());

    let session = device.begin_session().await;
    assert!(device.try_begin_session().is_none());

    // Cancellation releases the device on the spot.
    session.cancel();
    assert!(device.try_begin_session().is_some());
}
