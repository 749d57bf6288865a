//! Media picked before the trip exists.
//!
//! Each queued file owns a local preview handle acquired from the shell's
//! [`PreviewProvider`]. A handle is consumed by [`PreviewProvider::release`],
//! so it can be given back exactly once; the queue guarantees that the number
//! of live handles always equals its length and that [`StagingQueue::dispose_all`]
//! (also run on drop) returns every remaining handle.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::TripError;
use crate::gateway::{GatewayError, TripGateway};
use crate::model::{LocalFile, MediaReference, MediaType, TripId};

/// A scoped local preview (e.g. an object URL). Not `Clone`.
#[derive(Debug, PartialEq, Eq)]
pub struct PreviewHandle {
    id: Uuid,
    url: String,
}

impl PreviewHandle {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            url: url.into(),
        }
    }

    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Shell capability that creates and revokes local previews.
pub trait PreviewProvider: Send + Sync {
    fn acquire(&self, file: &LocalFile) -> PreviewHandle;

    fn release(&self, handle: PreviewHandle);
}

pub struct StagedMediaItem {
    file: LocalFile,
    preview: PreviewHandle,
    media_type: MediaType,
}

impl StagedMediaItem {
    #[must_use]
    pub const fn file(&self) -> &LocalFile {
        &self.file
    }

    #[must_use]
    pub fn preview_url(&self) -> &str {
        self.preview.url()
    }

    #[must_use]
    pub const fn media_type(&self) -> MediaType {
        self.media_type
    }
}

impl fmt::Debug for StagedMediaItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StagedMediaItem")
            .field("file", &self.file)
            .field("preview", &self.preview.id)
            .field("media_type", &self.media_type)
            .finish()
    }
}

/// Ordered queue of staged files, owned by one editing session.
pub struct StagingQueue {
    items: Vec<StagedMediaItem>,
    previews: Arc<dyn PreviewProvider>,
}

impl StagingQueue {
    pub fn new(previews: Arc<dyn PreviewProvider>) -> Self {
        Self {
            items: Vec::new(),
            previews,
        }
    }

    /// Appends `file`, acquiring its preview. Returns the queue.
    pub fn queue_file(&mut self, file: LocalFile) -> &[StagedMediaItem] {
        let preview = self.previews.acquire(&file);
        debug!(file = %file.name, preview = %preview.id, "preview acquired");
        let media_type = file.media_type();
        self.items.push(StagedMediaItem {
            file,
            preview,
            media_type,
        });
        &self.items
    }

    /// Removes the item at `index` and releases its preview.
    pub fn unqueue(&mut self, index: usize) -> Result<LocalFile, TripError> {
        if index >= self.items.len() {
            return Err(TripError::IndexOutOfRange {
                index,
                len: self.items.len(),
            });
        }
        let item = self.items.remove(index);
        Ok(self.release(item))
    }

    /// Releases every outstanding preview and empties the queue.
    pub fn dispose_all(&mut self) -> usize {
        let items = std::mem::take(&mut self.items);
        let count = items.len();
        for item in items {
            self.release(item);
        }
        if count > 0 {
            debug!(released = count, "staging queue disposed");
        }
        count
    }

    /// Copies of the queued files, in queue order.
    #[must_use]
    pub fn files(&self) -> Vec<LocalFile> {
        self.items.iter().map(|item| item.file.clone()).collect()
    }

    #[must_use]
    pub fn items(&self) -> &[StagedMediaItem] {
        &self.items
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn release(&self, item: StagedMediaItem) -> LocalFile {
        debug!(file = %item.file.name, preview = %item.preview.id, "preview released");
        self.previews.release(item.preview);
        item.file
    }
}

impl fmt::Debug for StagingQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StagingQueue")
            .field("items", &self.items)
            .finish_non_exhaustive()
    }
}

impl Drop for StagingQueue {
    fn drop(&mut self) {
        self.dispose_all();
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlushStep {
    Upload,
    Attach,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FlushFailure {
    pub index: usize,
    pub filename: String,
    pub step: FlushStep,
    pub error: GatewayError,
}

/// Outcome of uploading and attaching a queue.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FlushReport {
    /// Items that were uploaded and attached.
    pub attached: usize,
    /// The trip's media list from the last successful attach.
    pub media: Option<Vec<MediaReference>>,
    pub failures: Vec<FlushFailure>,
    /// Items left unfinished because the credential was rejected or the
    /// caller stopped the flush.
    pub skipped: usize,
}

impl FlushReport {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.skipped == 0
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.failures.len() + self.skipped
    }

    #[must_use]
    pub fn authentication_failure(&self) -> Option<&GatewayError> {
        self.failures
            .iter()
            .map(|failure| &failure.error)
            .find(|error| error.is_authentication())
    }
}

/// Uploads then attaches each file in order. Upload `i + 1` starts only after
/// attach `i` has finished. A failed item is recorded and the next one is
/// tried; an authentication failure stops the loop. `keep_going` is asked
/// before every call, and once it returns `false` nothing further is sent and
/// the unfinished items count as skipped. Nothing already attached is rolled
/// back.
#[instrument(skip_all, fields(trip_id = %trip_id, queued = files.len()))]
pub async fn flush_queue<G, F>(
    gateway: &G,
    trip_id: &TripId,
    files: &[LocalFile],
    keep_going: F,
) -> FlushReport
where
    G: TripGateway + ?Sized,
    F: Fn() -> bool,
{
    let mut report = FlushReport::default();

    for (index, file) in files.iter().enumerate() {
        if !keep_going() {
            report.skipped = files.len() - index;
            info!(skipped = report.skipped, "staging flush abandoned");
            break;
        }
        let (step, error) = match gateway.upload_file(file).await {
            Ok(_) if !keep_going() => {
                report.skipped = files.len() - index;
                info!(skipped = report.skipped, "staging flush abandoned after upload");
                break;
            }
            Ok(media) => match gateway.attach_media(trip_id, &media).await {
                Ok(list) => {
                    report.attached += 1;
                    report.media = Some(list);
                    continue;
                }
                Err(error) => (FlushStep::Attach, error),
            },
            Err(error) => (FlushStep::Upload, error),
        };

        warn!(index, file = %file.name, ?step, "staged media failed: {error}");
        let stop = error.is_authentication();
        report.failures.push(FlushFailure {
            index,
            filename: file.name.clone(),
            step,
            error,
        });
        if stop {
            report.skipped = files.len() - index - 1;
            break;
        }
    }

    info!(
        attached = report.attached,
        failed = report.failed(),
        "staging queue flushed"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{CountingPreviews, GatewayCall, GatewayOp, RecordingGateway};
    use assert_matches::assert_matches;

    fn file(name: &str) -> LocalFile {
        LocalFile::new(name, Some("image/jpeg".into()), name.as_bytes().to_vec())
    }

    fn queue() -> (StagingQueue, Arc<CountingPreviews>) {
        let previews = Arc::new(CountingPreviews::default());
        (StagingQueue::new(previews.clone()), previews)
    }

    #[test]
    fn test_queue_three_unqueue_middle() {
        let (mut queue, previews) = queue();
        queue.queue_file(file("a.jpg"));
        queue.queue_file(file("b.jpg"));
        let items = queue.queue_file(file("c.jpg"));
        assert_eq!(items.len(), 3);
        assert_eq!(previews.live(), 3);

        let removed = queue.unqueue(1).unwrap();
        assert_eq!(removed.name, "b.jpg");
        assert_eq!(queue.len(), 2);
        assert_eq!(previews.live(), 2);
        assert_eq!(previews.double_releases(), 0);
        assert_eq!(
            queue.items().iter().map(|i| i.file().name.as_str()).collect::<Vec<_>>(),
            vec!["a.jpg", "c.jpg"]
        );
    }

    #[test]
    fn test_unqueue_out_of_range_keeps_handles() {
        let (mut queue, previews) = queue();
        queue.queue_file(file("a.jpg"));

        assert_matches!(
            queue.unqueue(4),
            Err(TripError::IndexOutOfRange { index: 4, len: 1 })
        );
        assert_eq!(previews.live(), 1);
    }

    #[test]
    fn test_dispose_all_then_drop_releases_once() {
        let (mut queue, previews) = queue();
        queue.queue_file(file("a.jpg"));
        queue.queue_file(file("b.mp4"));

        assert_eq!(queue.dispose_all(), 2);
        assert_eq!(queue.dispose_all(), 0);
        drop(queue);

        assert_eq!(previews.live(), 0);
        assert_eq!(previews.acquired(), 2);
        assert_eq!(previews.released(), 2);
        assert_eq!(previews.double_releases(), 0);
    }

    #[test]
    fn test_drop_releases_outstanding_handles() {
        let (mut queue, previews) = queue();
        queue.queue_file(file("a.jpg"));
        drop(queue);
        assert_eq!(previews.live(), 0);
    }

    #[test]
    fn test_staged_item_classifies_media() {
        let (mut queue, _previews) = queue();
        queue.queue_file(LocalFile::new("clip.mov", None, vec![1u8]));
        assert_eq!(queue.items()[0].media_type(), MediaType::Video);
        assert!(queue.items()[0].preview_url().starts_with("blob:"));
    }

    #[tokio::test]
    async fn test_flush_is_sequential_and_ordered() {
        let gateway = RecordingGateway::default();
        let trip = gateway.seed_trip("Road trip");
        let id = trip.id.clone().unwrap();

        let report =
            flush_queue(&gateway, &id, &[file("one.jpg"), file("two.jpg")], || true).await;

        assert!(report.is_complete());
        assert_eq!(report.attached, 2);
        assert_eq!(report.media.as_ref().map(Vec::len), Some(2));

        let ops: Vec<GatewayOp> = gateway.calls().iter().map(GatewayCall::op).collect();
        assert_eq!(
            ops,
            vec![
                GatewayOp::Upload,
                GatewayOp::Attach,
                GatewayOp::Upload,
                GatewayOp::Attach
            ]
        );
    }

    #[tokio::test]
    async fn test_flush_continues_after_failed_item() {
        let gateway = RecordingGateway::default();
        let id = gateway.seed_trip("Road trip").id.unwrap();
        gateway.fail_nth(GatewayOp::Upload, 1, GatewayError::unavailable("disk full"));

        let report = flush_queue(
            &gateway,
            &id,
            &[file("one.jpg"), file("two.jpg"), file("three.jpg")],
            || true,
        )
        .await;

        assert_eq!(report.attached, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].index, 0);
        assert_eq!(report.failures[0].step, FlushStep::Upload);
        assert_eq!(gateway.count(GatewayOp::Attach), 2);
    }

    #[tokio::test]
    async fn test_flush_stops_on_authentication_failure() {
        let gateway = RecordingGateway::default();
        let id = gateway.seed_trip("Road trip").id.unwrap();
        gateway.fail_nth(
            GatewayOp::Attach,
            1,
            GatewayError::Authentication { status: 401 },
        );

        let report = flush_queue(
            &gateway,
            &id,
            &[file("one.jpg"), file("two.jpg"), file("three.jpg")],
            || true,
        )
        .await;

        assert_eq!(report.attached, 0);
        assert_eq!(report.skipped, 2);
        assert_eq!(report.failed(), 3);
        assert!(report.authentication_failure().is_some());
        assert_eq!(gateway.count(GatewayOp::Upload), 1);
    }

    #[tokio::test]
    async fn test_flush_sends_nothing_once_stopped() {
        let gateway = RecordingGateway::default();
        let id = gateway.seed_trip("Road trip").id.unwrap();
        let files = [file("one.jpg"), file("two.jpg"), file("three.jpg")];

        // Allows the first upload and attach, then reports closed.
        let checks = std::sync::atomic::AtomicUsize::new(0);
        let report = flush_queue(&gateway, &id, &files, || {
            checks.fetch_add(1, std::sync::atomic::Ordering::SeqCst) < 2
        })
        .await;

        assert_eq!(report.attached, 1);
        assert_eq!(report.skipped, 2);
        assert!(report.failures.is_empty());
        assert!(!report.is_complete());
        assert_eq!(gateway.count(GatewayOp::Upload), 1);
        assert_eq!(gateway.count(GatewayOp::Attach), 1);

        let report = flush_queue(&gateway, &id, &files, || false).await;
        assert_eq!(report.skipped, 3);
        assert_eq!(gateway.count(GatewayOp::Upload), 1);
    }
}
