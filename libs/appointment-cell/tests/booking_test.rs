use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use assert_matches::assert_matches;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use uuid::Uuid;

use appointment_cell::models::{AppointmentError, AppointmentStatus, AppointmentType, CreateAppointmentRequest};
use appointment_cell::services::{AppointmentStore, BookingService, InMemoryAppointmentStore};
use availability_cell::models::{
    AvailabilityError, BlockKind, CreateBlockRequest, SaveWorkingProfileRequest, WorkingProfile,
};
use availability_cell::services::{
    AvailabilityService, InMemoryBlockStore, InMemoryProfileStore, ProfileStore, SlotRejection, UpstreamCalendar,
    UpstreamError,
};
use shared_utils::WallClock;

struct RecordingUpstream {
    fail: bool,
    deleted: Mutex<Vec<String>>,
}

#[async_trait]
impl UpstreamCalendar for RecordingUpstream {
    async fn delete_event(&self, _professional_id: Uuid, external_event_id: &str) -> Result<(), UpstreamError> {
        if self.fail {
            return Err(UpstreamError::Failed("timeout".to_string()));
        }
        self.deleted.lock().unwrap().push(external_event_id.to_string());
        Ok(())
    }
}

struct Harness {
    booking: Arc<BookingService>,
    availability: Arc<AvailabilityService>,
    store: Arc<InMemoryAppointmentStore>,
    upstream: Arc<RecordingUpstream>,
    professional_id: Uuid,
}

fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

fn time(s: &str) -> NaiveTime {
    NaiveTime::parse_from_str(s, "%H:%M").unwrap()
}

fn monday_before() -> DateTime<Utc> {
    "2024-07-01T06:00:00Z".parse().unwrap()
}

async fn harness(upstream_fails: bool) -> Harness {
    let upstream = Arc::new(RecordingUpstream { fail: upstream_fails, deleted: Mutex::new(Vec::new()) });
    let availability = Arc::new(AvailabilityService::new(
        Arc::new(InMemoryProfileStore::new()),
        Arc::new(InMemoryBlockStore::new()),
        upstream.clone(),
    ));
    let store = Arc::new(InMemoryAppointmentStore::new());
    let clock = WallClock::from_zone_name("Europe/Berlin").unwrap();
    let booking = Arc::new(BookingService::new(availability.clone(), store.clone(), upstream.clone(), clock));

    let professional_id = Uuid::new_v4();
    availability
        .save_profile(
            professional_id,
            SaveWorkingProfileRequest {
                working_days: vec![1, 2, 3, 4, 5],
                working_start: time("09:00"),
                working_end: time("17:00"),
                session_duration_minutes: 50,
                break_duration_minutes: 10,
                tolerance_minutes: 0,
            },
        )
        .await
        .unwrap();

    Harness { booking, availability, store, upstream, professional_id }
}

fn request(professional_id: Uuid, day: &str, at: &str) -> CreateAppointmentRequest {
    CreateAppointmentRequest {
        professional_id,
        patient_id: None,
        appointment_date: date(day),
        appointment_time: time(at),
        duration_minutes: None,
        appointment_type: AppointmentType::Remote,
        location: None,
        meeting_link: Some("https://meet.example.com/room".to_string()),
    }
}

#[tokio::test]
async fn test_end_to_end_booking_flow() {
    let h = harness(false).await;
    let now = monday_before();

    h.availability
        .create_block(
            h.professional_id,
            CreateBlockRequest {
                kind: BlockKind::FullDay { start_date: date("2024-07-04"), end_date: None },
                title: Some("Independence Day".to_string()),
            },
        )
        .await
        .unwrap();

    assert_matches!(
        h.booking.check_slot_at(now, h.professional_id, date("2024-07-04"), time("10:00"), Some(50)).await,
        Err(AppointmentError::SlotUnavailable(SlotRejection::Blocked { .. }))
    );
    assert!(h.booking
        .check_slot_at(now, h.professional_id, date("2024-07-05"), time("10:00"), Some(50))
        .await
        .is_ok());

    let appointment = h.booking
        .create_appointment_at(now, Uuid::new_v4(), request(h.professional_id, "2024-07-05", "10:00"))
        .await
        .unwrap();
    assert_eq!(appointment.status, AppointmentStatus::Pending);
    assert_eq!(appointment.duration_minutes, 50);

    assert_matches!(
        h.booking.check_slot_at(now, h.professional_id, date("2024-07-05"), time("10:00"), Some(50)).await,
        Err(AppointmentError::SlotUnavailable(SlotRejection::Occupied { .. }))
    );
}

#[tokio::test]
async fn test_free_slots_reflect_bookings() {
    let h = harness(false).await;
    let now = monday_before();

    let before = h.booking.list_free_slots_at(now, h.professional_id, date("2024-07-05")).await.unwrap();
    assert_eq!(before.first(), Some(&time("09:00")));
    assert_eq!(before.len(), 9);

    h.booking
        .create_appointment_at(now, Uuid::new_v4(), request(h.professional_id, "2024-07-05", "09:00"))
        .await
        .unwrap();

    let after = h.booking.list_free_slots_at(now, h.professional_id, date("2024-07-05")).await.unwrap();
    assert!(!after.contains(&time("09:00")));
    assert!(!after.contains(&time("09:50")));
    assert_eq!(after.len(), 7);
}

#[tokio::test]
async fn test_past_slots_are_rejected() {
    let h = harness(false).await;
    let now: DateTime<Utc> = "2024-07-05T12:00:00Z".parse().unwrap();

    let result = h.booking
        .create_appointment_at(now, Uuid::new_v4(), request(h.professional_id, "2024-07-05", "10:00"))
        .await;

    assert_matches!(result, Err(AppointmentError::SlotUnavailable(SlotRejection::InPast)));
}

#[tokio::test]
async fn test_concurrent_requests_for_same_slot() {
    let h = harness(false).await;
    let now = monday_before();

    let first = h.booking.create_appointment_at(now, Uuid::new_v4(), request(h.professional_id, "2024-07-05", "10:00"));
    let second = h.booking.create_appointment_at(now, Uuid::new_v4(), request(h.professional_id, "2024-07-05", "10:00"));
    let (first, second) = futures::join!(first, second);

    let successes = [&first, &second].iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1);

    let loser = if first.is_ok() { second } else { first };
    assert_matches!(
        loser,
        Err(AppointmentError::SlotTaken)
            | Err(AppointmentError::SlotUnavailable(SlotRejection::Occupied { .. }))
    );
    assert_eq!(h.store.all().await.len(), 1);
}

#[tokio::test]
async fn test_store_exclusion_is_the_backstop() {
    let h = harness(false).await;
    let now = monday_before();

    let booked = h.booking
        .create_appointment_at(now, Uuid::new_v4(), request(h.professional_id, "2024-07-05", "10:00"))
        .await
        .unwrap();

    // Bypasses validation entirely.
    let mut overlapping = booked.clone();
    overlapping.id = Uuid::new_v4();
    overlapping.appointment_time = time("10:30");

    assert_matches!(h.store.insert(&overlapping).await, Err(AppointmentError::SlotTaken));
}

#[tokio::test]
async fn test_random_bookings_never_overlap() {
    let h = harness(false).await;
    let now = monday_before();
    let gap = 10;

    // Deterministic pseudo-random candidates in 5-minute steps.
    let mut seed: u64 = 0x5eed;
    for _ in 0..200 {
        seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        let minute = 9 * 60 + ((seed >> 33) % 96) as u32 * 5;
        let at = NaiveTime::from_hms_opt(minute / 60, minute % 60, 0).unwrap();

        let mut req = request(h.professional_id, "2024-07-05", "09:00");
        req.appointment_time = at;
        let _ = h.booking.create_appointment_at(now, Uuid::new_v4(), req).await;
    }

    let booked = h.store.all().await;
    assert!(!booked.is_empty());
    for a in &booked {
        for b in &booked {
            if a.id == b.id {
                continue;
            }
            let separated = a.start_minute() >= b.end_minute() + gap || b.start_minute() >= a.end_minute() + gap;
            assert!(separated, "{} and {} overlap", a.appointment_time, b.appointment_time);
        }
    }
}

#[tokio::test]
async fn test_lifecycle_and_cancellation_frees_slot() {
    let h = harness(false).await;
    let now = monday_before();

    let appointment = h.booking
        .create_appointment_at(now, Uuid::new_v4(), request(h.professional_id, "2024-07-05", "10:00"))
        .await
        .unwrap();

    let confirmed = h.booking.confirm_appointment(appointment.id).await.unwrap();
    assert_eq!(confirmed.status, AppointmentStatus::Confirmed);

    let cancelled = h.booking
        .cancel_appointment(appointment.id, Some("Feeling better".to_string()))
        .await
        .unwrap();
    assert_eq!(cancelled.status, AppointmentStatus::Cancelled);
    assert_eq!(cancelled.cancellation_reason.as_deref(), Some("Feeling better"));

    assert!(h.booking
        .check_slot_at(now, h.professional_id, date("2024-07-05"), time("10:00"), None)
        .await
        .is_ok());

    assert_matches!(
        h.booking.confirm_appointment(appointment.id).await,
        Err(AppointmentError::InvalidStatusTransition { from: AppointmentStatus::Cancelled, .. })
    );
}

#[tokio::test]
async fn test_cancel_removes_exported_event() {
    let h = harness(false).await;
    let now = monday_before();

    let appointment = h.booking
        .create_appointment_at(now, Uuid::new_v4(), request(h.professional_id, "2024-07-05", "10:00"))
        .await
        .unwrap();
    h.booking.confirm_appointment(appointment.id).await.unwrap();
    h.store.set_external_event(appointment.id, Some("evt-55".to_string())).await.unwrap();

    let cancelled = h.booking.cancel_appointment(appointment.id, None).await.unwrap();

    assert_eq!(cancelled.external_event_id, None);
    assert_eq!(*h.upstream.deleted.lock().unwrap(), vec!["evt-55".to_string()]);
    assert!(h.store.list_cancelled_with_reference(h.professional_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_cancel_keeps_reference_when_upstream_fails() {
    let h = harness(true).await;
    let now = monday_before();

    let appointment = h.booking
        .create_appointment_at(now, Uuid::new_v4(), request(h.professional_id, "2024-07-05", "10:00"))
        .await
        .unwrap();
    h.store.set_external_event(appointment.id, Some("evt-56".to_string())).await.unwrap();

    let cancelled = h.booking.cancel_appointment(appointment.id, None).await.unwrap();

    assert_eq!(cancelled.status, AppointmentStatus::Cancelled);
    assert_eq!(cancelled.external_event_id.as_deref(), Some("evt-56"));
    assert_eq!(h.store.list_cancelled_with_reference(h.professional_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_unknown_professional_is_not_found() {
    let h = harness(false).await;

    let result = h.booking
        .check_slot_at(monday_before(), Uuid::new_v4(), date("2024-07-05"), time("10:00"), None)
        .await;

    assert_matches!(result, Err(AppointmentError::Availability(_)));
}

struct CountingProfiles {
    inner: InMemoryProfileStore,
    reads: AtomicUsize,
}

#[async_trait]
impl ProfileStore for CountingProfiles {
    async fn get(&self, professional_id: Uuid) -> Result<Option<WorkingProfile>, AvailabilityError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.get(professional_id).await
    }

    async fn upsert(&self, profile: &WorkingProfile) -> Result<WorkingProfile, AvailabilityError> {
        self.inner.upsert(profile).await
    }
}

#[tokio::test]
async fn test_booking_reads_the_profile_once() {
    let profiles = Arc::new(CountingProfiles { inner: InMemoryProfileStore::new(), reads: AtomicUsize::new(0) });
    let upstream = Arc::new(RecordingUpstream { fail: false, deleted: Mutex::new(Vec::new()) });
    let availability = Arc::new(AvailabilityService::new(
        profiles.clone(),
        Arc::new(InMemoryBlockStore::new()),
        upstream.clone(),
    ));
    let booking = BookingService::new(
        availability.clone(),
        Arc::new(InMemoryAppointmentStore::new()),
        upstream,
        WallClock::from_zone_name("Europe/Berlin").unwrap(),
    );

    let professional_id = Uuid::new_v4();
    availability
        .save_profile(
            professional_id,
            SaveWorkingProfileRequest {
                working_days: vec![1, 2, 3, 4, 5],
                working_start: time("09:00"),
                working_end: time("17:00"),
                session_duration_minutes: 50,
                break_duration_minutes: 10,
                tolerance_minutes: 0,
            },
        )
        .await
        .unwrap();

    let created = booking
        .create_appointment_at(monday_before(), Uuid::new_v4(), request(professional_id, "2024-07-05", "10:00"))
        .await
        .unwrap();

    assert_eq!(created.duration_minutes, 50);
    assert_eq!(profiles.reads.load(Ordering::SeqCst), 1);
}
