//! In-memory doubles for the gateway and preview capabilities.
//!
//! Compiled for unit tests and behind the `test-utils` feature so shells can
//! drive sessions without a network.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::gateway::{GatewayError, TripGateway};
use crate::model::{LocalFile, MediaReference, Trip, TripId, TripPayload};
use crate::staging::{PreviewHandle, PreviewProvider};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GatewayOp {
    List,
    Fetch,
    Create,
    Update,
    Delete,
    Upload,
    Attach,
}

#[derive(Clone, Debug, PartialEq)]
pub enum GatewayCall {
    List,
    Fetch(TripId),
    Create(TripPayload),
    Update(TripId, TripPayload),
    Delete(TripId),
    Upload(String),
    Attach(TripId, MediaReference),
}

impl GatewayCall {
    #[must_use]
    pub const fn op(&self) -> GatewayOp {
        match self {
            Self::List => GatewayOp::List,
            Self::Fetch(_) => GatewayOp::Fetch,
            Self::Create(_) => GatewayOp::Create,
            Self::Update(..) => GatewayOp::Update,
            Self::Delete(_) => GatewayOp::Delete,
            Self::Upload(_) => GatewayOp::Upload,
            Self::Attach(..) => GatewayOp::Attach,
        }
    }
}

/// Holds one gateway call open until the test resumes it.
#[derive(Debug, Default)]
pub struct Gate {
    entered: Notify,
    resume: Notify,
}

impl Gate {
    /// Resolves once the paused call has started.
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    pub fn resume(&self) {
        self.resume.notify_one();
    }
}

struct Injected {
    op: GatewayOp,
    nth: usize,
    error: GatewayError,
}

#[derive(Default)]
struct Inner {
    trips: BTreeMap<TripId, Trip>,
    calls: Vec<GatewayCall>,
    counts: HashMap<GatewayOp, usize>,
    failures: Vec<Injected>,
    gates: Vec<(GatewayOp, Arc<Gate>)>,
    next_id: u64,
    next_upload: u64,
}

/// A [`TripGateway`] backed by a map, recording every call.
#[derive(Clone, Default)]
pub struct RecordingGateway {
    inner: Arc<Mutex<Inner>>,
}

impl RecordingGateway {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stores `trip`, assigning an id if it has none. Returns the stored copy.
    pub fn insert_trip(&self, mut trip: Trip) -> Trip {
        let mut inner = self.lock();
        let id = match trip.id.clone() {
            Some(id) => id,
            None => {
                inner.next_id += 1;
                TripId::new(format!("trip-{}", inner.next_id))
            }
        };
        trip.id = Some(id.clone());
        inner.trips.insert(id, trip.clone());
        trip
    }

    pub fn seed_trip(&self, title: &str) -> Trip {
        self.insert_trip(Trip {
            title: title.into(),
            ..Trip::default()
        })
    }

    #[must_use]
    pub fn trip(&self, id: &TripId) -> Option<Trip> {
        self.lock().trips.get(id).cloned()
    }

    #[must_use]
    pub fn trip_count(&self) -> usize {
        self.lock().trips.len()
    }

    #[must_use]
    pub fn calls(&self) -> Vec<GatewayCall> {
        self.lock().calls.clone()
    }

    #[must_use]
    pub fn count(&self, op: GatewayOp) -> usize {
        self.lock().counts.get(&op).copied().unwrap_or(0)
    }

    /// Makes the `nth` (1-based) call of `op` fail with `error`.
    pub fn fail_nth(&self, op: GatewayOp, nth: usize, error: GatewayError) {
        self.lock().failures.push(Injected { op, nth, error });
    }

    /// Holds the next call of `op` until [`Gate::resume`].
    pub fn pause(&self, op: GatewayOp) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        self.lock().gates.push((op, gate.clone()));
        gate
    }

    async fn enter(&self, call: GatewayCall) -> Result<(), GatewayError> {
        let op = call.op();
        let (gate, failure) = {
            let mut inner = self.lock();
            inner.calls.push(call);
            let count = inner.counts.entry(op).or_insert(0);
            *count += 1;
            let nth = *count;

            let gate = inner
                .gates
                .iter()
                .position(|(gated, _)| *gated == op)
                .map(|index| inner.gates.remove(index).1);
            let failure = inner
                .failures
                .iter()
                .position(|f| f.op == op && f.nth == nth)
                .map(|index| inner.failures.remove(index).error);
            (gate, failure)
        };

        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.resume.notified().await;
        }
        failure.map_or(Ok(()), Err)
    }
}

fn apply(trip: &mut Trip, payload: &TripPayload) {
    trip.title = payload.title.clone();
    trip.regions = payload.regions.clone();
    trip.comment = payload.comment.clone();
    trip.rating = payload.rating;
    trip.photo_urls = payload.photo_urls.clone();
    trip.start_date = payload.start_date;
    trip.end_date = payload.end_date;
}

#[async_trait]
impl TripGateway for RecordingGateway {
    async fn list_trips(&self) -> Result<Vec<Trip>, GatewayError> {
        self.enter(GatewayCall::List).await?;
        Ok(self.lock().trips.values().cloned().collect())
    }

    async fn fetch_trip(&self, id: &TripId) -> Result<Trip, GatewayError> {
        self.enter(GatewayCall::Fetch(id.clone())).await?;
        self.trip(id).ok_or(GatewayError::NotFound)
    }

    async fn create_trip(&self, payload: &TripPayload) -> Result<Trip, GatewayError> {
        self.enter(GatewayCall::Create(payload.clone())).await?;
        let mut trip = Trip::default();
        apply(&mut trip, payload);
        Ok(self.insert_trip(trip))
    }

    async fn update_trip(&self, id: &TripId, payload: &TripPayload) -> Result<Trip, GatewayError> {
        self.enter(GatewayCall::Update(id.clone(), payload.clone()))
            .await?;
        let mut inner = self.lock();
        let trip = inner.trips.get_mut(id).ok_or(GatewayError::NotFound)?;
        apply(trip, payload);
        Ok(trip.clone())
    }

    async fn delete_trip(&self, id: &TripId) -> Result<(), GatewayError> {
        self.enter(GatewayCall::Delete(id.clone())).await?;
        self.lock()
            .trips
            .remove(id)
            .map(|_| ())
            .ok_or(GatewayError::NotFound)
    }

    async fn upload_file(&self, file: &LocalFile) -> Result<MediaReference, GatewayError> {
        self.enter(GatewayCall::Upload(file.name.clone())).await?;
        let mut inner = self.lock();
        inner.next_upload += 1;
        Ok(MediaReference {
            url: format!("/uploads/{}-{}", inner.next_upload, file.name),
            media_type: file.media_type(),
            filename: file.name.clone(),
        })
    }

    async fn attach_media(
        &self,
        id: &TripId,
        media: &MediaReference,
    ) -> Result<Vec<MediaReference>, GatewayError> {
        self.enter(GatewayCall::Attach(id.clone(), media.clone()))
            .await?;
        let mut inner = self.lock();
        let trip = inner.trips.get_mut(id).ok_or(GatewayError::NotFound)?;
        trip.media.push(media.clone());
        Ok(trip.media.clone())
    }
}

#[derive(Default)]
struct PreviewLedger {
    live: HashSet<Uuid>,
    acquired: usize,
    released: usize,
    double_releases: usize,
}

/// Preview provider that counts handles and flags unknown releases.
#[derive(Default)]
pub struct CountingPreviews {
    ledger: Mutex<PreviewLedger>,
}

impl CountingPreviews {
    fn ledger(&self) -> MutexGuard<'_, PreviewLedger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn live(&self) -> usize {
        self.ledger().live.len()
    }

    #[must_use]
    pub fn acquired(&self) -> usize {
        self.ledger().acquired
    }

    #[must_use]
    pub fn released(&self) -> usize {
        self.ledger().released
    }

    #[must_use]
    pub fn double_releases(&self) -> usize {
        self.ledger().double_releases
    }
}

impl PreviewProvider for CountingPreviews {
    fn acquire(&self, file: &LocalFile) -> PreviewHandle {
        let handle = PreviewHandle::new(format!("blob:preview/{}", file.name));
        let mut ledger = self.ledger();
        ledger.live.insert(handle.id());
        ledger.acquired += 1;
        handle
    }

    fn release(&self, handle: PreviewHandle) {
        let mut ledger = self.ledger();
        if ledger.live.remove(&handle.id()) {
            ledger.released += 1;
        } else {
            ledger.double_releases += 1;
        }
    }
}
