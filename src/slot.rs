use std::sync::Arc;

use crossbeam_channel::Sender;
use log::{debug, warn};

use crate::decode::{Bitmap, DecodeError};
use crate::list::{ListEvent, PreviewCache};
use crate::map::{MapDefinition, MapId};
use crate::present::{DateFormat, ImagePresenter, Presented};
use crate::worker::{DecodePool, TaskHandle, TaskId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewState {
    Empty,
    Pending,
    Ready,
    Failed,
}

/// Text shown next to the preview.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowLabels {
    pub name: String,
    pub players: String,
    pub date: Option<String>,
}

impl RowLabels {
    fn new(map: &MapDefinition, dates: Option<&DateFormat>) -> Self {
        Self {
            name: map.name.clone(),
            players: map.player_range(),
            date: dates.map(|format| format.format(&map.created_at)),
        }
    }
}

/// Collaborators every slot needs, injected by the list that owns it.
#[derive(Clone)]
pub struct SlotContext {
    pub pool: Arc<DecodePool>,
    pub presenter: Arc<dyn ImagePresenter>,
    pub events: Sender<ListEvent>,
    pub cache: Option<Arc<PreviewCache>>,
    /// Set when rows should show the map's creation date.
    pub dates: Option<DateFormat>,
}

struct PendingDecode {
    handle: TaskHandle,
    map: MapId,
}

/// Binding state for one visible row: the map it shows and at most one in-flight decode.
pub struct Slot {
    index: usize,
    bound: Option<MapDefinition>,
    pending: Option<PendingDecode>,
    state: PreviewState,
    labels: Option<RowLabels>,
    ctx: SlotContext,
}

impl Slot {
    pub fn new(index: usize, ctx: SlotContext) -> Self {
        Self {
            index,
            bound: None,
            pending: None,
            state: PreviewState::Empty,
            labels: None,
            ctx,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn bound(&self) -> Option<&MapDefinition> {
        self.bound.as_ref()
    }

    pub fn state(&self) -> PreviewState {
        self.state
    }

    pub fn labels(&self) -> Option<&RowLabels> {
        self.labels.as_ref()
    }

    pub fn pending_task(&self) -> Option<TaskId> {
        self.pending.as_ref().map(|pending| pending.handle.id())
    }

    /// Shows `map` in this row. Returns false when the row already shows it, in which
    /// case nothing is restarted.
    pub fn bind(&mut self, map: &MapDefinition) -> bool {
        if self.bound.as_ref().is_some_and(|bound| bound.is_same(map)) {
            return false;
        }

        self.cancel_pending();
        self.bound = Some(map.clone());
        self.labels = Some(RowLabels::new(map, self.ctx.dates.as_ref()));

        if let Some(bitmap) = self.ctx.cache.as_ref().and_then(|cache| cache.get(&map.id)) {
            debug!("slot {}: cached preview for {}", self.index, map.name);
            self.state = PreviewState::Ready;
            self.ctx.presenter.present(self.index, Presented::Bitmap(bitmap));
            return true;
        }

        self.state = PreviewState::Pending;
        self.ctx.presenter.present(self.index, Presented::Placeholder);

        let events = self.ctx.events.clone();
        let slot = self.index;
        let handle = self.ctx.pool.submit(map.preview().clone(), move |task, result| {
            let _ = events.send(ListEvent::Decoded { slot, task, result });
        });
        debug!(
            "slot {}: bound {} ({}), decode task {}",
            self.index,
            map.name,
            map.id,
            handle.id()
        );
        self.pending = Some(PendingDecode {
            handle,
            map: map.id.clone(),
        });
        true
    }

    /// Applies a finished decode. Results for anything other than the current task of the
    /// currently bound map are dropped; returns whether the result was applied.
    pub fn complete(&mut self, task: TaskId, result: Result<Bitmap, DecodeError>) -> bool {
        let Some(pending) = &self.pending else {
            return false;
        };
        if pending.handle.id() != task || pending.handle.is_cancelled() {
            return false;
        }
        let Some(bound) = &self.bound else {
            return false;
        };
        if bound.id != pending.map {
            return false;
        }

        self.pending = None;
        match result {
            Ok(bitmap) => {
                if let Some(cache) = &self.ctx.cache {
                    cache.insert(bound.id.clone(), bitmap.clone());
                }
                self.state = PreviewState::Ready;
                self.ctx.presenter.present(self.index, Presented::Bitmap(bitmap));
            }
            Err(err) => {
                warn!("slot {}: preview for {} failed: {err}", self.index, bound.name);
                self.state = PreviewState::Failed;
                self.ctx.presenter.present(self.index, Presented::Placeholder);
            }
        }
        true
    }

    pub fn unbind(&mut self) {
        if self.bound.is_none() && self.pending.is_none() {
            return;
        }
        self.cancel_pending();
        self.bound = None;
        self.labels = None;
        self.state = PreviewState::Empty;
        self.ctx.presenter.release(self.index);
    }

    /// The map a click on this row refers to, if any.
    pub fn activated(&self) -> Option<&MapDefinition> {
        self.bound.as_ref()
    }

    fn cancel_pending(&mut self) {
        if let Some(pending) = self.pending.take() {
            debug!("slot {}: cancelling task {}", self.index, pending.handle.id());
            pending.handle.cancel();
        }
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.cancel_pending();
    }
}
