use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver};
use log::{debug, info};
use parking_lot::Mutex;

use crate::decode::{Bitmap, DecodeError};
use crate::map::{MapDefinition, MapId, Snapshot};
use crate::present::{DateFormat, ImagePresenter, SelectionSink};
use crate::slot::{Slot, SlotContext};
use crate::source::{MapSource, Registration};
use crate::worker::{DecodePool, TaskId};

/// Messages delivered to the list on its owning thread.
pub enum ListEvent {
    SnapshotReplaced {
        attachment: u64,
        snapshot: Snapshot,
    },
    Decoded {
        slot: usize,
        task: TaskId,
        result: Result<Bitmap, DecodeError>,
    },
}

/// Successfully decoded previews, keyed by map.
#[derive(Debug, Default)]
pub struct PreviewCache {
    entries: Mutex<HashMap<MapId, Bitmap>>,
}

impl PreviewCache {
    pub fn get(&self, id: &MapId) -> Option<Bitmap> {
        self.entries.lock().get(id).cloned()
    }

    pub fn insert(&self, id: MapId, bitmap: Bitmap) {
        self.entries.lock().insert(id, bitmap);
    }

    pub fn retain_snapshot(&self, snapshot: &Snapshot) {
        self.entries.lock().retain(|id, _| snapshot.contains(id));
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Options {
    pub visible_rows: usize,
    pub show_dates: bool,
    pub date_format: DateFormat,
    pub cache_previews: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            visible_rows: 10,
            show_dates: false,
            date_format: DateFormat::default(),
            cache_previews: true,
        }
    }
}

struct Attachment {
    source: Arc<dyn MapSource>,
    registration: Registration,
    generation: u64,
}

/// Keeps a window of slots bound to the current snapshot of a map source.
///
/// All mutation happens on the thread that owns the list; sources and decode workers only
/// talk to it through the event channel drained by [`MapList::poll`].
pub struct MapList {
    slots: Vec<Slot>,
    snapshot: Snapshot,
    offset: usize,
    selected: usize,
    visible_rows: usize,
    attachment: Option<Attachment>,
    attachments: u64,
    ctx: SlotContext,
    selection: Arc<dyn SelectionSink>,
    events_rx: Receiver<ListEvent>,
}

impl MapList {
    pub fn new(
        options: Options,
        pool: Arc<DecodePool>,
        presenter: Arc<dyn ImagePresenter>,
        selection: Arc<dyn SelectionSink>,
    ) -> Self {
        let (events_tx, events_rx) = unbounded();
        let ctx = SlotContext {
            pool,
            presenter,
            events: events_tx,
            cache: options
                .cache_previews
                .then(|| Arc::new(PreviewCache::default())),
            dates: options.show_dates.then(|| options.date_format.clone()),
        };
        let mut list = Self {
            slots: Vec::new(),
            snapshot: Snapshot::empty(),
            offset: 0,
            selected: 0,
            visible_rows: 0,
            attachment: None,
            attachments: 0,
            ctx,
            selection,
            events_rx,
        };
        list.set_viewport(options.visible_rows);
        list
    }

    pub fn attach(&mut self, source: Arc<dyn MapSource>) {
        self.detach();
        self.attachments += 1;
        let generation = self.attachments;
        let events = self.ctx.events.clone();
        let registration = source.observe(Box::new(move |snapshot: Snapshot| {
            let _ = events.send(ListEvent::SnapshotReplaced {
                attachment: generation,
                snapshot,
            });
        }));
        let current = source.current_snapshot();
        self.attachment = Some(Attachment {
            source,
            registration,
            generation,
        });
        info!("list: attached with {} maps", current.len());
        self.on_snapshot_replaced(current);
    }

    pub fn detach(&mut self) {
        if let Some(attachment) = self.attachment.take() {
            attachment.source.unobserve(attachment.registration);
            info!("list: detached");
        }
        for slot in &mut self.slots {
            slot.unbind();
        }
    }

    pub fn is_attached(&self) -> bool {
        self.attachment.is_some()
    }

    /// Rebinds every slot by position against `snapshot`.
    pub fn on_snapshot_replaced(&mut self, snapshot: Snapshot) {
        debug!("list: snapshot replaced ({} maps)", snapshot.len());
        if let Some(cache) = &self.ctx.cache {
            cache.retain_snapshot(&snapshot);
        }
        self.snapshot = snapshot;
        self.selected = self.selected.min(self.snapshot.len().saturating_sub(1));
        self.clamp_offset();
        self.reconcile();
    }

    /// Drains pending events without blocking. Returns true if anything was handled.
    pub fn poll(&mut self) -> bool {
        let mut changed = false;
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event);
            changed = true;
        }
        changed
    }

    /// Waits up to `timeout` for the first event, then drains the rest.
    pub fn poll_timeout(&mut self, timeout: Duration) -> bool {
        match self.events_rx.recv_timeout(timeout) {
            Ok(event) => {
                self.handle_event(event);
                self.poll();
                true
            }
            Err(_) => false,
        }
    }

    fn handle_event(&mut self, event: ListEvent) {
        match event {
            ListEvent::SnapshotReplaced {
                attachment,
                snapshot,
            } => {
                let current = self.attachment.as_ref().map(|a| a.generation);
                if current != Some(attachment) {
                    return;
                }
                self.on_snapshot_replaced(snapshot);
            }
            ListEvent::Decoded { slot, task, result } => {
                if let Some(slot) = self.slots.get_mut(slot) {
                    slot.complete(task, result);
                }
            }
        }
    }

    /// Resizes the window of visible rows. Rows that go away cancel their decode.
    pub fn set_viewport(&mut self, rows: usize) {
        if rows == self.visible_rows {
            return;
        }
        if rows < self.slots.len() {
            for mut slot in self.slots.drain(rows..) {
                slot.unbind();
            }
        }
        while self.slots.len() < rows {
            let index = self.slots.len();
            self.slots.push(Slot::new(index, self.ctx.clone()));
        }
        self.visible_rows = rows;
        self.clamp_offset();
        self.reconcile();
    }

    fn reconcile(&mut self) {
        for (row, slot) in self.slots.iter_mut().enumerate() {
            match self.snapshot.get(self.offset + row) {
                Some(map) => {
                    slot.bind(map);
                }
                None => slot.unbind(),
            }
        }
    }

    fn clamp_offset(&mut self) {
        let rows = self.visible_rows.max(1);
        let max_offset = self.snapshot.len().saturating_sub(rows);
        if self.selected < self.offset {
            self.offset = self.selected;
        } else if self.selected >= self.offset + rows {
            self.offset = self.selected + 1 - rows;
        }
        self.offset = self.offset.min(max_offset);
    }

    pub fn select(&mut self, index: usize) {
        if self.snapshot.is_empty() {
            self.selected = 0;
            return;
        }
        self.selected = index.min(self.snapshot.len() - 1);
        let before = self.offset;
        self.clamp_offset();
        if before != self.offset {
            self.reconcile();
        }
    }

    pub fn move_selection(&mut self, delta: isize) {
        let target = if delta.is_negative() {
            self.selected.saturating_sub(delta.unsigned_abs())
        } else {
            self.selected.saturating_add(delta.unsigned_abs())
        };
        self.select(target);
    }

    pub fn page_down(&mut self) {
        let step = self.visible_rows.max(1) as isize;
        self.move_selection(step);
    }

    pub fn page_up(&mut self) {
        let step = self.visible_rows.max(1) as isize;
        self.move_selection(-step);
    }

    pub fn select_first(&mut self) {
        self.select(0);
    }

    pub fn select_last(&mut self) {
        self.select(self.snapshot.len().saturating_sub(1));
    }

    /// Forwards the map shown in `row` to the selection sink.
    pub fn activate(&self, row: usize) -> Option<MapDefinition> {
        let map = self.slots.get(row)?.activated()?.clone();
        info!("list: activated {}", map.name);
        self.selection.on_item_activated(&map);
        Some(map)
    }

    pub fn activate_selected(&self) -> Option<MapDefinition> {
        let row = self.selected.checked_sub(self.offset)?;
        self.activate(row)
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn slot(&self, row: usize) -> Option<&Slot> {
        self.slots.get(row)
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn selected(&self) -> usize {
        self.selected
    }

    /// Row of the selection within the viewport.
    pub fn selected_row(&self) -> Option<usize> {
        if self.snapshot.is_empty() {
            return None;
        }
        self.selected
            .checked_sub(self.offset)
            .filter(|row| *row < self.slots.len())
    }

    pub fn visible_rows(&self) -> usize {
        self.visible_rows
    }

    pub fn cache(&self) -> Option<&Arc<PreviewCache>> {
        self.ctx.cache.as_ref()
    }
}

impl Drop for MapList {
    fn drop(&mut self) {
        self.detach();
    }
}
