//! The viewer session: volume slots, load lifecycle, cursor and display
//! state, and composition of the three views.
//!
//! Everything runs on one thread. Network work happens behind the
//! [`Fetcher`]; its replies and external coordinate requests are applied in
//! [`ViewerSession::poll`]. Every state change bumps [`ViewerSession::revision`]
//! so a surface knows when to recompose.

use crate::compositor::{compose_slice, Layers, Presentation, SliceImage};
use crate::config::{DisplayConfig, MapParams, ViewerConfig};
use crate::coords::{Axis, Grid};
use crate::cursor::Cursor;
use crate::decode::decode_volume;
use crate::error::LoadError;
use crate::events::{CoordinateBus, CoordinateSubscription, MmCoord};
use crate::net::{
    overlay_url, parse_peak, peak_url, CancelToken, FetchReply, FetchRequest, Fetcher,
    ReplyReceiver, ReplySender, Resource,
};
use crate::threshold::resolve_threshold;
use crate::volume::Volume;

/// Loading flag and last error of one volume slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotStatus<'a> {
    pub loading: bool,
    pub error: Option<&'a str>,
}

#[derive(Debug, Default)]
struct Slot {
    volume: Option<Volume>,
    error: Option<String>,
    loading: bool,
    generation: u64,
    cancel: Option<CancelToken>,
    source: Option<String>,
}

impl Slot {
    fn supersede(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        self.generation += 1;
        self.volume = None;
        self.error = None;
    }

    /// Start a load of `source`, dropping the current volume and
    /// invalidating any request still in flight.
    fn begin(&mut self, source: String) -> (u64, CancelToken) {
        self.supersede();
        self.loading = true;
        self.source = Some(source);
        let cancel = CancelToken::new();
        self.cancel = Some(cancel.clone());
        (self.generation, cancel)
    }

    fn clear(&mut self) {
        self.supersede();
        self.loading = false;
        self.source = None;
    }

    fn accepts(&self, generation: u64) -> bool {
        self.loading && generation == self.generation
    }

    fn finish(&mut self, result: Result<Volume, LoadError>) {
        self.loading = false;
        self.cancel = None;
        match result {
            Ok(volume) => {
                self.volume = Some(volume);
                self.error = None;
            }
            Err(e) => {
                self.volume = None;
                self.error = Some(e.to_string());
            }
        }
    }

    fn status(&self) -> SlotStatus<'_> {
        SlotStatus {
            loading: self.loading,
            error: self.error.as_deref(),
        }
    }
}

pub struct ViewerSession {
    api_base: String,
    background_source: String,
    debounce_secs: f64,
    display: DisplayConfig,
    map_params: MapParams,
    /// Parameters waiting out the debounce, with their deadline.
    pending_params: Option<(MapParams, f64)>,
    query: Option<String>,
    background: Slot,
    overlay: Slot,
    peak_generation: u64,
    peak_cancel: Option<CancelToken>,
    grid: Option<Grid>,
    cursor: Cursor,
    threshold: Option<f32>,
    fetcher: Box<dyn Fetcher>,
    reply_tx: ReplySender,
    reply_rx: ReplyReceiver,
    coords: CoordinateSubscription,
    revision: u64,
}

impl ViewerSession {
    pub fn new(config: ViewerConfig, fetcher: Box<dyn Fetcher>, bus: &CoordinateBus) -> Self {
        let (reply_tx, reply_rx) = tokio::sync::mpsc::unbounded_channel();
        Self {
            api_base: config.api_base,
            background_source: config.background_source,
            debounce_secs: config.param_debounce_secs,
            display: config.display,
            map_params: config.map,
            pending_params: None,
            query: config.initial_query,
            background: Slot::default(),
            overlay: Slot::default(),
            peak_generation: 0,
            peak_cancel: None,
            grid: None,
            cursor: Cursor::new(),
            threshold: None,
            fetcher,
            reply_tx,
            reply_rx,
            coords: bus.subscribe(),
            revision: 0,
        }
    }

    /// Kick off the background load and, if a query was configured, the
    /// overlay and peak lookups.
    pub fn start(&mut self) {
        self.reload_background();
        if self.query.is_some() {
            self.refresh_overlay();
            self.request_peak();
        }
    }

    pub fn reload_background(&mut self) {
        let source = self.background_source.clone();
        let (generation, cancel) = self.background.begin(source.clone());
        self.dispatch(Resource::Background, generation, source, cancel);
        self.volumes_changed();
    }

    /// Install a background from bytes already in memory (a local file).
    /// Supersedes any background fetch still in flight.
    pub fn load_background_bytes(&mut self, label: &str, bytes: &[u8]) {
        self.background.begin(label.to_string());
        let result = decode_volume(bytes).map_err(LoadError::from);
        self.finish_load(Resource::Background, result);
    }

    /// Change the active query term. An empty term clears the overlay.
    pub fn set_query(&mut self, query: &str) {
        let query = Some(query.trim().to_string()).filter(|q| !q.is_empty());
        if query == self.query {
            return;
        }
        self.query = query;
        self.refresh_overlay();
        self.request_peak();
        self.touch();
    }

    /// Queue new map parameters; they apply once `now` passes the debounce
    /// deadline in [`ViewerSession::poll`].
    pub fn set_map_params(&mut self, params: MapParams, now: f64) {
        if self.debounce_secs <= 0.0 {
            self.pending_params = None;
            self.apply_map_params(params);
        } else if params == self.map_params {
            self.pending_params = None;
        } else {
            self.pending_params = Some((params, now + self.debounce_secs));
        }
    }

    fn apply_map_params(&mut self, params: MapParams) {
        if params != self.map_params {
            self.map_params = params;
            self.refresh_overlay();
        }
    }

    fn tick(&mut self, now: f64) {
        if let Some((params, deadline)) = self.pending_params {
            if now >= deadline {
                self.pending_params = None;
                self.apply_map_params(params);
            }
        }
    }

    fn refresh_overlay(&mut self) {
        let url = self
            .query
            .as_deref()
            .map(|q| overlay_url(&self.api_base, q, &self.map_params));
        if url == self.overlay.source {
            return;
        }
        match url {
            Some(url) => {
                let (generation, cancel) = self.overlay.begin(url.clone());
                self.dispatch(Resource::Overlay, generation, url, cancel);
            }
            None => self.overlay.clear(),
        }
        self.volumes_changed();
    }

    fn request_peak(&mut self) {
        if let Some(cancel) = self.peak_cancel.take() {
            cancel.cancel();
        }
        self.peak_generation += 1;
        if let Some(query) = self.query.as_deref() {
            let url = peak_url(&self.api_base, query);
            let cancel = CancelToken::new();
            self.peak_cancel = Some(cancel.clone());
            self.dispatch(Resource::Peak, self.peak_generation, url, cancel);
        }
    }

    fn dispatch(&self, resource: Resource, generation: u64, url: String, cancel: CancelToken) {
        let request = FetchRequest {
            resource,
            generation,
            url,
            cancel,
        };
        self.fetcher.fetch(request, self.reply_tx.clone());
    }

    /// Apply finished loads, due parameter changes and external coordinate
    /// requests. Returns whether anything visible changed.
    pub fn poll(&mut self, now: f64) -> bool {
        let before = self.revision;
        self.tick(now);
        while let Ok(reply) = self.reply_rx.try_recv() {
            self.handle_reply(reply);
        }
        while let Some(coord) = self.coords.try_next() {
            self.set_coords(coord);
        }
        self.revision != before
    }

    fn handle_reply(&mut self, reply: FetchReply) {
        match reply.resource {
            Resource::Background | Resource::Overlay => {
                let slot = match reply.resource {
                    Resource::Background => &self.background,
                    _ => &self.overlay,
                };
                if !slot.accepts(reply.generation) {
                    log::debug!(
                        "discarding superseded {:?} reply (generation {})",
                        reply.resource,
                        reply.generation
                    );
                    return;
                }
                let result = reply
                    .result
                    .map_err(LoadError::from)
                    .and_then(|bytes| decode_volume(&bytes).map_err(LoadError::from));
                self.finish_load(reply.resource, result);
            }
            Resource::Peak => {
                if reply.generation != self.peak_generation {
                    return;
                }
                self.peak_cancel = None;
                match reply.result {
                    Ok(body) => match parse_peak(&body) {
                        Some(coord) => self.set_coords(coord),
                        None => log::debug!("peak lookup returned no location"),
                    },
                    Err(e) => log::debug!("peak lookup failed: {e}"),
                }
            }
        }
    }

    fn finish_load(&mut self, resource: Resource, result: Result<Volume, LoadError>) {
        match &result {
            Ok(volume) => log::info!(
                "{resource:?} loaded: {:?} voxels at {:?} mm",
                volume.dims(),
                volume.spacing()
            ),
            Err(e) => log::warn!("{resource:?} failed: {e}"),
        }
        if resource == Resource::Overlay {
            if let Ok(volume) = &result {
                let (min, max) = volume.value_range();
                if min <= max {
                    self.display.threshold_value = self.display.threshold_value.clamp(min, max);
                }
            }
            self.overlay.finish(result);
        } else {
            self.background.finish(result);
        }
        self.volumes_changed();
    }

    /// Grid from the background if present, otherwise from the overlay.
    fn active_grid(&self) -> Option<Grid> {
        let source = self
            .background
            .volume
            .as_ref()
            .or(self.overlay.volume.as_ref())?;
        Some(source.grid())
    }

    fn volumes_changed(&mut self) {
        let grid = self.active_grid();
        if grid != self.grid {
            self.grid = grid;
            if let Some(grid) = &self.grid {
                self.cursor.on_grid_changed(grid);
            }
        }
        self.refresh_threshold();
        self.touch();
    }

    fn refresh_threshold(&mut self) {
        self.threshold = resolve_threshold(self.overlay.volume.as_ref(), &self.display);
    }

    fn touch(&mut self) {
        self.revision = self.revision.wrapping_add(1);
    }

    // ── Cursor ───────────────────────────────────────────────────────

    /// Jump to a millimetre position, or hold it until a grid exists.
    pub fn set_coords(&mut self, coord: MmCoord) {
        self.cursor.set_coords(self.grid.as_ref(), coord);
        self.touch();
    }

    /// Click at image pixel `(col, row)` of the view normal to `axis`.
    pub fn click(&mut self, axis: Axis, col: u32, row: u32) {
        if let Some(grid) = self.grid {
            self.cursor.click(&grid, axis, col, row, self.display.mirror_x);
            self.touch();
        }
    }

    /// Click at device-pixel position `(sx, sy)` of a presentation surface.
    /// Returns false when the point is outside the drawn slice.
    pub fn click_surface(&mut self, axis: Axis, presentation: &Presentation, sx: f64, sy: f64) -> bool {
        match presentation.surface_to_image(sx, sy) {
            Some((col, row)) if self.grid.is_some() => {
                self.click(axis, col, row);
                true
            }
            _ => false,
        }
    }

    pub fn edit_coord(&mut self, axis: Axis, text: impl Into<String>) {
        self.cursor.edit(axis, text);
    }

    /// Apply a typed coordinate. Unparsable text is left in place.
    pub fn commit_coord(&mut self, axis: Axis) -> bool {
        match self.cursor.commit(self.grid.as_ref(), axis) {
            Ok(()) => {
                self.touch();
                true
            }
            Err(e) => {
                log::debug!("{axis} coordinate not applied: {e}");
                false
            }
        }
    }

    pub fn step_slice(&mut self, axis: Axis, delta: isize) {
        if let Some(grid) = self.grid {
            self.cursor.step(&grid, axis, delta);
            self.touch();
        }
    }

    // ── Display ──────────────────────────────────────────────────────

    pub fn set_display(&mut self, display: DisplayConfig) {
        if display != self.display {
            self.display = display;
            self.refresh_threshold();
            self.touch();
        }
    }

    /// Compose the view normal to `axis` from the current state.
    pub fn compose(&self, axis: Axis) -> Option<SliceImage> {
        let layers = Layers {
            grid: self.grid?,
            background: self.background.volume.as_ref(),
            overlay: self.overlay.volume.as_ref(),
        };
        compose_slice(&layers, axis, self.cursor.indices(), &self.display, self.threshold)
    }

    /// Axial, coronal and sagittal views, in that order.
    pub fn compose_views(&self) -> [Option<SliceImage>; 3] {
        [Axis::Z, Axis::Y, Axis::X].map(|axis| self.compose(axis))
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn grid(&self) -> Option<Grid> {
        self.grid
    }

    pub fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    pub fn display(&self) -> &DisplayConfig {
        &self.display
    }

    /// Map parameters including any still waiting out the debounce.
    pub fn map_params(&self) -> MapParams {
        self.pending_params
            .map_or(self.map_params, |(params, _)| params)
    }

    pub fn has_pending_params(&self) -> bool {
        self.pending_params.is_some()
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn threshold(&self) -> Option<f32> {
        self.threshold
    }

    pub fn background(&self) -> Option<&Volume> {
        self.background.volume.as_ref()
    }

    pub fn overlay(&self) -> Option<&Volume> {
        self.overlay.volume.as_ref()
    }

    pub fn background_status(&self) -> SlotStatus<'_> {
        self.background.status()
    }

    pub fn overlay_status(&self) -> SlotStatus<'_> {
        self.overlay.status()
    }

    /// URL of the overlay currently requested, for a download link.
    pub fn overlay_url(&self) -> Option<&str> {
        self.overlay.source.as_deref()
    }
}
