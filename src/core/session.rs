//! Terminal session
//!
//! [`TerminalSession`] binds an emulator, its fit and link behaviors and a
//! mount node into one object with an explicit lifecycle:
//!
//! ```text
//! Created ──open──▶ Mounted ──dispose──▶ Disposed
//!    └────────────dispose──────────────────▲
//! ```
//!
//! Output from the remote process goes in through [`TerminalSession::send`];
//! user input comes out through [`TerminalSession::on_data`]. The session
//! never talks to the remote process itself.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, info, info_span, warn, Span};

use super::emulator::{Emulator, EmulatorEvent, VtEmulator};
use super::events::{Emitter, Subscription};
use super::write_buffer::{FlushedWrite, WriteBuffer, WriteCompletion};
use crate::addons::{
    AutoFit, ClipboardLinkHandler, FitBehavior, Link, LinkBehavior, LinkDetector, LinkHandler,
    LogLinkHandler,
};
use crate::config::{Config, LinkHandlerKind, LinksConfig};
use crate::error::{LifecycleState, Result, SendError, SessionError};
use crate::surface::{Dimensions, InputEvent, MountTarget};
use crate::ui::KeyMapper;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Everything a session owns apart from its node
struct Parts {
    emulator: Box<dyn Emulator>,
    fit: Box<dyn FitBehavior>,
    links: Box<dyn LinkBehavior>,
}

enum Lifecycle {
    Created(Parts),
    Mounted {
        parts: Parts,
        node: Box<dyn MountTarget>,
    },
    Disposed,
}

impl Lifecycle {
    fn state(&self) -> LifecycleState {
        match self {
            Lifecycle::Created(_) => LifecycleState::Created,
            Lifecycle::Mounted { .. } => LifecycleState::Mounted,
            Lifecycle::Disposed => LifecycleState::Disposed,
        }
    }

    fn mounted(&self, operation: &'static str) -> Result<(&Parts, &dyn MountTarget)> {
        match self {
            Lifecycle::Mounted { parts, node } => Ok((parts, &**node)),
            Lifecycle::Created(_) => Err(SessionError::NotMounted {
                operation,
                state: LifecycleState::Created,
            }),
            Lifecycle::Disposed => Err(SessionError::Disposed),
        }
    }

    fn mounted_mut(&mut self, operation: &'static str) -> Result<(&mut Parts, &mut dyn MountTarget)> {
        match self {
            Lifecycle::Mounted { parts, node } => Ok((parts, &mut **node)),
            Lifecycle::Created(_) => Err(SessionError::NotMounted {
                operation,
                state: LifecycleState::Created,
            }),
            Lifecycle::Disposed => Err(SessionError::Disposed),
        }
    }

    fn parts(&self) -> Result<&Parts> {
        match self {
            Lifecycle::Created(parts) | Lifecycle::Mounted { parts, .. } => Ok(parts),
            Lifecycle::Disposed => Err(SessionError::Disposed),
        }
    }
}

struct Emitters {
    data: Emitter<str>,
    resize: Emitter<Dimensions>,
    title: Emitter<str>,
}

impl Emitters {
    fn new() -> Self {
        Self {
            data: Emitter::new("data"),
            resize: Emitter::new("resize"),
            title: Emitter::new("title"),
        }
    }

    fn clear(&self) {
        self.data.clear();
        self.resize.clear();
        self.title.clear();
    }
}

/// What [`TerminalSession::process_input`] did with the node's input
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputSummary {
    /// Events that produced data for `on_data` listeners
    pub delivered: usize,
    /// The node reported a geometry change; call `fit` to follow it
    pub geometry_changed: bool,
}

enum InputOutcome {
    Delivered,
    GeometryChanged,
    Handled,
}

pub struct TerminalSession {
    id: u64,
    lifecycle: Lifecycle,
    writes: WriteBuffer,
    events: Emitters,
    span: Span,
}

impl TerminalSession {
    /// Session with the built-in emulator and behaviors
    pub fn new(config: &Config) -> Self {
        Self::from_parts(
            config,
            Box::new(VtEmulator::new(config)),
            Box::new(AutoFit::new(config.fit.clone())),
            Box::new(link_detector(&config.links)),
        )
    }

    /// Session with injected parts
    pub fn from_parts(
        config: &Config,
        emulator: Box<dyn Emulator>,
        fit: Box<dyn FitBehavior>,
        links: Box<dyn LinkBehavior>,
    ) -> Self {
        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        let span = info_span!("session", id);
        debug!(parent: &span, fit = fit.name(), links = links.name(), "Session created");
        Self {
            id,
            lifecycle: Lifecycle::Created(Parts {
                emulator,
                fit,
                links,
            }),
            writes: WriteBuffer::new(config.write_batch_bytes),
            events: Emitters::new(),
            span,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    /// Attach the behaviors, render into `node` and fit to its size.
    ///
    /// On failure the session stays `Created` and `node` is left detached.
    pub fn open(&mut self, node: impl MountTarget + 'static) -> Result<()> {
        self.open_boxed(Box::new(node))
    }

    pub fn open_boxed(&mut self, mut node: Box<dyn MountTarget>) -> Result<()> {
        let _span = self.span.clone().entered();

        let mut parts = match std::mem::replace(&mut self.lifecycle, Lifecycle::Disposed) {
            Lifecycle::Created(parts) => parts,
            Lifecycle::Mounted { parts, node } => {
                self.lifecycle = Lifecycle::Mounted { parts, node };
                return Err(SessionError::AlreadyMounted);
            }
            Lifecycle::Disposed => return Err(SessionError::Disposed),
        };

        if let Err(error) = node.attach() {
            self.lifecycle = Lifecycle::Created(parts);
            return Err(error.into());
        }
        parts.fit.activate(parts.emulator.as_ref());
        parts.links.activate(parts.emulator.as_ref());

        let resized = match mount(&mut parts, node.as_mut()) {
            Ok(resized) => resized,
            Err(error) => {
                warn!("Open failed: {error}");
                parts.links.dispose();
                parts.fit.dispose();
                node.detach();
                self.lifecycle = Lifecycle::Created(parts);
                return Err(error);
            }
        };

        info!(dimensions = %parts.emulator.dimensions(), "Session mounted");
        self.lifecycle = Lifecycle::Mounted { parts, node };
        if let Some(dimensions) = resized {
            self.events.resize.emit(&dimensions);
        }
        Ok(())
    }

    /// Match rows and columns to the node's current size.
    ///
    /// `on_resize` listeners have run before this returns when the size
    /// changed.
    pub fn fit(&mut self) -> Result<()> {
        let _span = self.span.clone().entered();
        let (parts, node) = self.lifecycle.mounted_mut("fit")?;

        let resized = parts.fit.fit(parts.emulator.as_mut(), &*node)?;
        if let Some(dimensions) = resized {
            debug!(%dimensions, "Fitted to node");
            refresh(parts, node)?;
            self.events.resize.emit(&dimensions);
        }
        self.pump()?;
        Ok(())
    }

    /// Set an explicit geometry, bypassing the fit behavior
    pub fn resize(&mut self, cols: u16, rows: u16) -> Result<()> {
        let _span = self.span.clone().entered();
        let (parts, node) = self.lifecycle.mounted_mut("resize")?;

        let dimensions = Dimensions::new(cols, rows);
        if dimensions == parts.emulator.dimensions() {
            return Ok(());
        }
        parts.emulator.resize(dimensions)?;
        refresh(parts, node)?;
        self.events.resize.emit(&dimensions);
        Ok(())
    }

    pub fn focus(&mut self) -> Result<()> {
        let (_, node) = self.lifecycle.mounted_mut("focus")?;
        node.focus();
        Ok(())
    }

    pub fn rows(&self) -> Result<u16> {
        Ok(self.dimensions_for("rows")?.rows)
    }

    pub fn cols(&self) -> Result<u16> {
        Ok(self.dimensions_for("cols")?.cols)
    }

    pub fn dimensions(&self) -> Result<Dimensions> {
        self.dimensions_for("dimensions")
    }

    fn dimensions_for(&self, operation: &'static str) -> Result<Dimensions> {
        let (parts, _) = self.lifecycle.mounted(operation)?;
        Ok(parts.emulator.dimensions())
    }

    /// Current window title, empty until the remote process sets one
    pub fn title(&self) -> Result<String> {
        Ok(self.lifecycle.parts()?.emulator.title().to_string())
    }

    /// Listen for user input and emulator replies bound for the remote
    /// process
    pub fn on_data(&self, listener: impl FnMut(&str) + 'static) -> Result<Subscription> {
        self.lifecycle.parts()?;
        Ok(self.events.data.subscribe(listener))
    }

    pub fn on_resize(&self, listener: impl FnMut(&Dimensions) + 'static) -> Result<Subscription> {
        self.lifecycle.parts()?;
        Ok(self.events.resize.subscribe(listener))
    }

    pub fn on_title_change(&self, listener: impl FnMut(&str) + 'static) -> Result<Subscription> {
        self.lifecycle.parts()?;
        Ok(self.events.title.subscribe(listener))
    }

    /// Queue output from the remote process.
    ///
    /// The first batch is processed before this returns; call [`tick`] to
    /// work through the rest of a large backlog. The completion resolves
    /// once this chunk has been parsed and rendered.
    ///
    /// [`tick`]: TerminalSession::tick
    pub fn send(&mut self, data: impl AsRef<[u8]>) -> Result<WriteCompletion> {
        let _span = self.span.clone().entered();
        self.lifecycle.mounted("send")?;

        let completion = self.writes.push(data.as_ref().to_vec());
        self.pump()?;
        if !self.writes.is_empty() {
            debug!(pending_bytes = self.writes.pending_bytes(), "Output left for tick");
        }
        Ok(completion)
    }

    /// Process one more batch of queued output, returning whether any is
    /// left
    pub fn tick(&mut self) -> Result<bool> {
        let _span = self.span.clone().entered();
        self.lifecycle.mounted("tick")?;
        self.pump()?;
        Ok(!self.writes.is_empty())
    }

    /// Clear scrollback and screen, keeping the cursor line on top
    pub fn clear(&mut self) -> Result<()> {
        let (parts, node) = self.lifecycle.mounted_mut("clear")?;
        parts.emulator.clear();
        refresh(parts, node)
    }

    /// Deliver one input event as if the node produced it
    pub fn input(&mut self, event: InputEvent) -> Result<()> {
        let _span = self.span.clone().entered();
        self.handle_input(event).map(|_| ())
    }

    /// Drain and deliver everything the node has queued
    pub fn process_input(&mut self) -> Result<InputSummary> {
        let _span = self.span.clone().entered();
        let (_, node) = self.lifecycle.mounted_mut("process_input")?;
        let pending = node.poll_input();

        let mut summary = InputSummary::default();
        for event in pending {
            match self.handle_input(event)? {
                InputOutcome::Delivered => summary.delivered += 1,
                InputOutcome::GeometryChanged => summary.geometry_changed = true,
                InputOutcome::Handled => {}
            }
        }
        Ok(summary)
    }

    /// Links detected on the visible screen
    pub fn links(&self) -> Result<Vec<Link>> {
        let (parts, _) = self.lifecycle.mounted("links")?;
        Ok(parts.links.links().to_vec())
    }

    /// Activate the link covering a cell, returning whether there was one
    pub fn activate_link_at(&mut self, col: u16, row: u16) -> Result<bool> {
        let (parts, _) = self.lifecycle.mounted_mut("activate_link_at")?;
        let Some(link) = parts.links.link_at(col, row).cloned() else {
            return Ok(false);
        };
        debug!(uri = %link.uri, "Activating link");
        parts.links.open_link(&link);
        Ok(true)
    }

    /// Release the emulator and both behaviors, settle pending writes with
    /// [`SendError::Disposed`] and leave the node unrendered.
    pub fn dispose(&mut self) -> Result<()> {
        let _span = self.span.clone().entered();
        let (parts, node) = match std::mem::replace(&mut self.lifecycle, Lifecycle::Disposed) {
            Lifecycle::Created(parts) => (parts, None),
            Lifecycle::Mounted { parts, node } => (parts, Some(node)),
            Lifecycle::Disposed => return Err(SessionError::Disposed),
        };

        let Parts {
            emulator,
            mut fit,
            mut links,
        } = parts;
        drop(emulator);
        links.dispose();
        fit.dispose();

        let cancelled = self.writes.cancel_all(SendError::Disposed);
        self.events.clear();
        if let Some(mut node) = node {
            node.detach();
        }
        info!(cancelled, "Session disposed");
        Ok(())
    }

    fn handle_input(&mut self, event: InputEvent) -> Result<InputOutcome> {
        let (parts, _) = self.lifecycle.mounted_mut("input")?;

        let data = match event {
            InputEvent::Key(key) => KeyMapper::map(&key, parts.emulator.modes()),
            InputEvent::Text(text) => Some(text),
            InputEvent::Paste(text) => Some(KeyMapper::paste(&text, parts.emulator.modes())),
            InputEvent::Click { col, row } => {
                if let Some(link) = parts.links.link_at(col, row).cloned() {
                    debug!(uri = %link.uri, "Activating link");
                    parts.links.open_link(&link);
                }
                return Ok(InputOutcome::Handled);
            }
            InputEvent::Resized => return Ok(InputOutcome::GeometryChanged),
        };

        match data {
            Some(data) if !data.is_empty() => {
                self.events.data.emit(&data);
                Ok(InputOutcome::Delivered)
            }
            _ => Ok(InputOutcome::Handled),
        }
    }

    /// Feed one batch of queued output to the emulator, render it, then
    /// settle finished writes and publish what the emulator reported
    fn pump(&mut self) -> Result<()> {
        if self.writes.is_empty() {
            return Ok(());
        }
        let (parts, node) = self.lifecycle.mounted_mut("send")?;

        let mut reported = Vec::new();
        let emulator = &mut parts.emulator;
        let flushed = self
            .writes
            .drain_batch(|bytes| reported.extend(emulator.write(bytes)));
        // Unrendered writes are dropped here and resolve as abandoned
        refresh(parts, node)?;
        flushed.into_iter().for_each(FlushedWrite::complete);

        for event in reported {
            match event {
                EmulatorEvent::Reply(reply) => {
                    self.events.data.emit(&reply);
                }
                EmulatorEvent::TitleChanged(title) => {
                    debug!(%title, "Title changed");
                    self.events.title.emit(&title);
                }
                EmulatorEvent::Bell => debug!("Bell"),
            }
        }
        Ok(())
    }
}

impl Drop for TerminalSession {
    fn drop(&mut self) {
        if self.lifecycle.state() != LifecycleState::Disposed {
            let _ = self.dispose();
        }
    }
}

/// Fit a freshly attached node and draw the first frame
fn mount(parts: &mut Parts, node: &mut dyn MountTarget) -> Result<Option<Dimensions>> {
    let resized = parts.fit.fit(parts.emulator.as_mut(), &*node)?;
    if resized.is_none() {
        // The starting buffer predates the size limit
        parts.emulator.check_size(parts.emulator.dimensions())?;
    }
    refresh(parts, node)?;
    Ok(resized)
}

/// Render the current screen and re-detect links in it
fn refresh(parts: &mut Parts, node: &mut dyn MountTarget) -> Result<()> {
    let frame = parts.emulator.frame();
    node.render(&frame)?;
    parts.links.scan(&frame);
    Ok(())
}

fn link_detector(config: &LinksConfig) -> LinkDetector {
    let handler: Box<dyn LinkHandler> = match config.handler {
        LinkHandlerKind::Log => Box::new(LogLinkHandler),
        LinkHandlerKind::Clipboard => Box::new(ClipboardLinkHandler::default()),
    };
    match config.compiled_pattern() {
        Ok(Some(pattern)) => LinkDetector::with_pattern(pattern, handler),
        Ok(None) => LinkDetector::new(handler),
        Err(error) => {
            warn!("Ignoring link pattern: {error}");
            LinkDetector::new(handler)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

    use super::*;
    use crate::addons::Addon;
    use crate::core::term::{CursorShape, TerminalModes};
    use crate::error::{EmulatorError, SurfaceError};
    use crate::surface::{Frame, FrameCursor, HeadlessSurface};

    /// 800x400 pixels maps to 80x24 cells
    fn config() -> Config {
        let mut config = Config::default();
        config.fit.cell_width = 10.0;
        config.fit.cell_height = 16.5;
        config
    }

    fn open_on(node: &HeadlessSurface) -> TerminalSession {
        let mut session = TerminalSession::new(&config());
        session.open(node.clone()).unwrap();
        session
    }

    fn record<T>() -> (Rc<RefCell<Vec<T::Owned>>>, impl FnMut(&T) + 'static)
    where
        T: ?Sized + ToOwned + 'static,
        T::Owned: 'static,
    {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        (seen, move |value: &T| sink.borrow_mut().push(value.to_owned()))
    }

    #[tokio::test]
    async fn test_open_send_and_render() {
        let node = HeadlessSurface::new(800.0, 400.0);
        let mut session = open_on(&node);

        assert_eq!(session.rows().unwrap(), 24);
        assert_eq!(session.cols().unwrap(), 80);

        let completion = session.send("hello\r\n").unwrap();
        assert_eq!(completion.await, Ok(()));
        assert_eq!(node.line(0).as_deref(), Some("hello"));
    }

    #[test]
    fn test_fit_fires_resize_once() {
        let node = HeadlessSurface::new(800.0, 400.0);
        let mut session = open_on(&node);
        let (resizes, listener) = record::<Dimensions>();
        let _subscription = session.on_resize(listener).unwrap();

        node.set_size(400.0, 200.0);
        session.fit().unwrap();
        session.fit().unwrap();

        assert_eq!(*resizes.borrow(), vec![Dimensions::new(40, 12)]);
        assert_eq!(session.rows().unwrap(), 12);
        assert_eq!(session.cols().unwrap(), 40);
    }

    #[test]
    fn test_operations_guarded_by_lifecycle() {
        let node = HeadlessSurface::new(800.0, 400.0);
        let mut session = TerminalSession::new(&config());

        assert!(matches!(
            session.focus(),
            Err(SessionError::NotMounted {
                operation: "focus",
                state: LifecycleState::Created
            })
        ));
        assert!(session.send("x").is_err());

        session.open(node.clone()).unwrap();
        session.focus().unwrap();
        assert!(node.is_focused());

        session.dispose().unwrap();
        assert!(matches!(session.focus(), Err(SessionError::Disposed)));
        assert!(matches!(session.rows(), Err(SessionError::Disposed)));
        assert!(matches!(session.dispose(), Err(SessionError::Disposed)));
        assert!(matches!(session.on_data(|_| {}), Err(SessionError::Disposed)));
        assert!(matches!(session.open(node.clone()), Err(SessionError::Disposed)));
        assert!(!node.is_attached());
    }

    #[test]
    fn test_open_twice_is_rejected() {
        let node = HeadlessSurface::new(800.0, 400.0);
        let other = HeadlessSurface::new(400.0, 200.0);
        let mut session = open_on(&node);

        assert!(matches!(session.open(other.clone()), Err(SessionError::AlreadyMounted)));
        assert!(!other.is_attached());
        assert_eq!(session.state(), LifecycleState::Mounted);
        assert_eq!(session.cols().unwrap(), 80);
    }

    #[test]
    fn test_node_hosts_one_session() {
        let node = HeadlessSurface::new(800.0, 400.0);
        let _first = open_on(&node);
        let mut second = TerminalSession::new(&config());

        assert!(matches!(
            second.open(node.clone()),
            Err(SessionError::Surface(SurfaceError::AlreadyHosting))
        ));
        assert_eq!(second.state(), LifecycleState::Created);
    }

    #[test]
    fn test_open_failure_leaves_session_created() {
        let mut small = config();
        small.max_cells = 100;
        let node = HeadlessSurface::new(800.0, 400.0);
        let mut session = TerminalSession::new(&small);

        assert!(matches!(
            session.open(node.clone()),
            Err(SessionError::Emulator(_))
        ));
        assert_eq!(session.state(), LifecycleState::Created);
        assert!(!node.is_attached());

        node.set_size(50.0, 33.0);
        session.open(node.clone()).unwrap();
        assert_eq!(session.dimensions().unwrap(), Dimensions::new(5, 2));
    }

    #[test]
    fn test_unfitted_open_respects_buffer_limit() {
        let mut small = config();
        small.max_cells = 100;
        let node = HeadlessSurface::unmeasured();
        let mut session = TerminalSession::new(&small);

        assert!(matches!(
            session.open(node.clone()),
            Err(SessionError::Emulator(EmulatorError::BufferTooLarge {
                cols: 80,
                rows: 24,
                limit: 100
            }))
        ));
        assert_eq!(session.state(), LifecycleState::Created);
        assert!(!node.is_attached());
    }

    #[test]
    fn test_empty_matching_link_pattern_falls_back() {
        let mut config = config();
        config.links.pattern = Some(r"(https?://\S+)?".to_string());
        let node = HeadlessSurface::new(800.0, 400.0);
        let mut session = TerminalSession::new(&config);

        session.open(node.clone()).unwrap();
        let _ = session.send("see https://example.org now\r\n").unwrap();

        let links = session.links().unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].uri, "https://example.org");
    }

    #[test]
    fn test_narrow_node_with_zero_minimums() {
        let mut config = config();
        config.fit.min_cols = 0;
        config.fit.min_rows = 0;
        let node = HeadlessSurface::new(5.0, 400.0);
        let mut session = TerminalSession::new(&config);

        session.open(node.clone()).unwrap();
        assert_eq!(session.dimensions().unwrap(), Dimensions::new(1, 24));
    }

    #[test]
    fn test_initial_fit_reaches_early_listeners() {
        let node = HeadlessSurface::new(400.0, 200.0);
        let mut session = TerminalSession::new(&config());
        let (resizes, listener) = record::<Dimensions>();
        let _subscription = session.on_resize(listener).unwrap();

        session.open(node.clone()).unwrap();

        assert_eq!(*resizes.borrow(), vec![Dimensions::new(40, 12)]);
        assert_eq!(node.frame().unwrap().dimensions, Dimensions::new(40, 12));
    }

    #[test]
    fn test_data_listeners_fire_in_order() {
        let node = HeadlessSurface::new(800.0, 400.0);
        let mut session = open_on(&node);
        let seen = Rc::new(RefCell::new(Vec::new()));

        let mut subscriptions = Vec::new();
        for i in 0..3 {
            let seen = Rc::clone(&seen);
            subscriptions.push(
                session
                    .on_data(move |data| seen.borrow_mut().push(format!("{i}:{data}")))
                    .unwrap(),
            );
            if i == 0 {
                subscriptions.push(session.on_data(|_| panic!("listener failure")).unwrap());
            }
        }

        node.push_input(InputEvent::Text("x".into()));
        node.push_input(InputEvent::Key(KeyEvent::new(KeyCode::Enter, KeyModifiers::NONE)));
        let summary = session.process_input().unwrap();

        assert_eq!(summary.delivered, 2);
        assert_eq!(*seen.borrow(), vec!["0:x", "1:x", "2:x", "0:\r", "1:\r", "2:\r"]);
    }

    #[test]
    fn test_unsubscribed_listener_stops() {
        let node = HeadlessSurface::new(800.0, 400.0);
        let mut session = open_on(&node);
        let (seen, listener) = record::<str>();

        let subscription = session.on_data(listener).unwrap();
        session.input(InputEvent::Text("a".into())).unwrap();
        subscription.unsubscribe();
        session.input(InputEvent::Text("b".into())).unwrap();

        assert_eq!(*seen.borrow(), vec!["a".to_string()]);
    }

    #[test]
    fn test_write_clear_write_is_idempotent() {
        let node = HeadlessSurface::new(800.0, 400.0);
        let mut session = open_on(&node);
        let data = "first\r\n\x1b[1mbold\x1b[0m line\r\n";

        let mut completion = session.send(data).unwrap();
        assert_eq!(completion.try_result(), Some(Ok(())));
        let first = node.frame().unwrap();

        session.clear().unwrap();
        let mut completion = session.send(data).unwrap();
        assert_eq!(completion.try_result(), Some(Ok(())));

        assert_eq!(node.frame().unwrap(), first);
    }

    #[tokio::test]
    async fn test_large_writes_complete_in_order() {
        let mut small_batches = config();
        small_batches.write_batch_bytes = 4;
        let node = HeadlessSurface::new(800.0, 400.0);
        let mut session = TerminalSession::new(&small_batches);
        session.open(node.clone()).unwrap();

        let mut first = session.send("abcdefghij").unwrap();
        assert!(first.try_result().is_none());
        assert_eq!(node.line(0).as_deref(), Some("abcd"));

        let second = session.send("kl").unwrap();
        assert!(first.try_result().is_none());
        assert_eq!(node.line(0).as_deref(), Some("abcdefgh"));

        while session.tick().unwrap() {}
        assert_eq!(first.try_result(), Some(Ok(())));
        assert_eq!(second.await, Ok(()));
        assert_eq!(node.line(0).as_deref(), Some("abcdefghijkl"));
    }

    #[tokio::test]
    async fn test_dispose_settles_pending_writes() {
        let mut small_batches = config();
        small_batches.write_batch_bytes = 2;
        let node = HeadlessSurface::new(800.0, 400.0);
        let mut session = TerminalSession::new(&small_batches);
        session.open(node.clone()).unwrap();

        let pending = session.send("not yet").unwrap();
        session.dispose().unwrap();

        assert_eq!(pending.await, Err(SendError::Disposed));
        assert!(node.frame().is_none());
        assert!(!node.is_attached());
    }

    #[test]
    fn test_title_changes_and_replies() {
        let node = HeadlessSurface::new(800.0, 400.0);
        let mut session = open_on(&node);
        let (titles, on_title) = record::<str>();
        let (data, on_data) = record::<str>();
        let _title = session.on_title_change(on_title).unwrap();
        let _data = session.on_data(on_data).unwrap();

        let _ = session.send("\x1b]2;build log\x07\x1b[6n").unwrap();

        assert_eq!(*titles.borrow(), vec!["build log".to_string()]);
        assert_eq!(session.title().unwrap(), "build log");
        assert_eq!(*data.borrow(), vec!["\x1b[1;1R".to_string()]);
    }

    #[test]
    fn test_no_events_after_dispose() {
        let node = HeadlessSurface::new(800.0, 400.0);
        let mut session = open_on(&node);
        let (seen, listener) = record::<str>();
        session.on_data(listener).unwrap().detach();

        session.dispose().unwrap();
        node.push_input(InputEvent::Text("late".into()));

        assert!(matches!(session.process_input(), Err(SessionError::Disposed)));
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn test_paste_is_bracketed_when_requested() {
        let node = HeadlessSurface::new(800.0, 400.0);
        let mut session = open_on(&node);
        let (data, listener) = record::<str>();
        let _subscription = session.on_data(listener).unwrap();

        session.input(InputEvent::Paste("a\nb".into())).unwrap();
        let _ = session.send("\x1b[?2004h").unwrap();
        session.input(InputEvent::Paste("c\r\n".into())).unwrap();

        assert_eq!(
            *data.borrow(),
            vec!["a\rb".to_string(), "\x1b[200~c\r\x1b[201~".to_string()]
        );
    }

    #[test]
    fn test_click_activates_link() {
        let node = HeadlessSurface::new(800.0, 400.0);
        let mut session = open_on(&node);

        let _ = session.send("docs: https://example.org/guide\r\n").unwrap();
        let links = session.links().unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].uri, "https://example.org/guide");

        assert!(session.activate_link_at(10, 0).unwrap());
        assert!(!session.activate_link_at(2, 0).unwrap());

        node.push_input(InputEvent::Click { col: 6, row: 0 });
        node.push_input(InputEvent::Resized);
        let summary = session.process_input().unwrap();
        assert_eq!(summary.delivered, 0);
        assert!(summary.geometry_changed);
    }

    #[test]
    fn test_explicit_resize() {
        let node = HeadlessSurface::new(800.0, 400.0);
        let mut session = open_on(&node);
        let (resizes, listener) = record::<Dimensions>();
        let _subscription = session.on_resize(listener).unwrap();

        session.resize(100, 30).unwrap();
        session.resize(100, 30).unwrap();
        assert!(matches!(session.resize(0, 30), Err(SessionError::Emulator(_))));

        assert_eq!(*resizes.borrow(), vec![Dimensions::new(100, 30)]);
        assert_eq!(node.frame().unwrap().dimensions, Dimensions::new(100, 30));
    }

    #[test]
    fn test_dispose_from_created() {
        let mut session = TerminalSession::new(&config());
        let (seen, listener) = record::<Dimensions>();
        session.on_resize(listener).unwrap().detach();

        session.dispose().unwrap();
        assert_eq!(session.state(), LifecycleState::Disposed);
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn test_drop_releases_node() {
        let node = HeadlessSurface::new(800.0, 400.0);
        {
            let _session = open_on(&node);
            assert!(node.is_attached());
        }
        assert!(!node.is_attached());
    }

    type Log = Rc<RefCell<Vec<String>>>;

    struct FakeEmulator {
        log: Log,
        dimensions: Dimensions,
        modes: TerminalModes,
    }

    impl Emulator for FakeEmulator {
        fn dimensions(&self) -> Dimensions {
            self.dimensions
        }

        fn resize(&mut self, dimensions: Dimensions) -> std::result::Result<(), EmulatorError> {
            self.log.borrow_mut().push(format!("emulator resized to {dimensions}"));
            self.dimensions = dimensions;
            Ok(())
        }

        fn write(&mut self, data: &[u8]) -> Vec<EmulatorEvent> {
            self.log
                .borrow_mut()
                .push(format!("emulator wrote {}", String::from_utf8_lossy(data)));
            Vec::new()
        }

        fn frame(&self) -> Frame {
            Frame {
                dimensions: self.dimensions,
                rows: Vec::new(),
                cursor: FrameCursor {
                    col: 0,
                    row: 0,
                    visible: true,
                    shape: CursorShape::Default,
                },
            }
        }

        fn modes(&self) -> &TerminalModes {
            &self.modes
        }

        fn title(&self) -> &str {
            ""
        }

        fn clear(&mut self) {}
    }

    impl Drop for FakeEmulator {
        fn drop(&mut self) {
            self.log.borrow_mut().push("emulator released".to_string());
        }
    }

    /// Proposes whatever the test sets, ignoring the node
    struct FixedFit {
        log: Log,
        target: Rc<RefCell<Dimensions>>,
    }

    impl Addon for FixedFit {
        fn name(&self) -> &'static str {
            "fixed fit"
        }

        fn activate(&mut self, _emulator: &dyn Emulator) {
            self.log.borrow_mut().push("fit activated".to_string());
        }

        fn dispose(&mut self) {
            self.log.borrow_mut().push("fit released".to_string());
        }
    }

    impl FitBehavior for FixedFit {
        fn propose_dimensions(&self, _node: &dyn MountTarget) -> Option<Dimensions> {
            Some(*self.target.borrow())
        }

        fn fit(
            &mut self,
            emulator: &mut dyn Emulator,
            node: &dyn MountTarget,
        ) -> std::result::Result<Option<Dimensions>, EmulatorError> {
            match self.propose_dimensions(node) {
                Some(proposed) if proposed != emulator.dimensions() => {
                    emulator.resize(proposed)?;
                    Ok(Some(proposed))
                }
                _ => Ok(None),
            }
        }
    }

    struct ScanCounter {
        log: Log,
    }

    impl Addon for ScanCounter {
        fn name(&self) -> &'static str {
            "scan counter"
        }

        fn activate(&mut self, _emulator: &dyn Emulator) {
            self.log.borrow_mut().push("links activated".to_string());
        }

        fn dispose(&mut self) {
            self.log.borrow_mut().push("links released".to_string());
        }
    }

    impl LinkBehavior for ScanCounter {
        fn scan(&mut self, frame: &Frame) {
            self.log
                .borrow_mut()
                .push(format!("links scanned {}", frame.dimensions));
        }

        fn links(&self) -> &[Link] {
            &[]
        }

        fn open_link(&mut self, _link: &Link) {}
    }

    fn injected(log: &Log, target: &Rc<RefCell<Dimensions>>) -> TerminalSession {
        TerminalSession::from_parts(
            &config(),
            Box::new(FakeEmulator {
                log: Rc::clone(log),
                dimensions: Dimensions::new(80, 24),
                modes: TerminalModes::default(),
            }),
            Box::new(FixedFit {
                log: Rc::clone(log),
                target: Rc::clone(target),
            }),
            Box::new(ScanCounter {
                log: Rc::clone(log),
            }),
        )
    }

    #[test]
    fn test_injected_parts_follow_the_lifecycle() {
        let log = Log::default();
        let target = Rc::new(RefCell::new(Dimensions::new(30, 10)));
        let node = HeadlessSurface::unmeasured();
        let mut session = injected(&log, &target);
        let (resizes, listener) = record::<Dimensions>();
        let _subscription = session.on_resize(listener).unwrap();

        session.open(node.clone()).unwrap();
        assert_eq!(
            *log.borrow(),
            vec![
                "fit activated",
                "links activated",
                "emulator resized to 30x10",
                "links scanned 30x10",
            ]
        );
        assert_eq!(session.dimensions().unwrap(), Dimensions::new(30, 10));

        log.borrow_mut().clear();
        *target.borrow_mut() = Dimensions::new(50, 20);
        session.fit().unwrap();
        let _ = session.send("ok").unwrap();
        assert_eq!(
            *log.borrow(),
            vec![
                "emulator resized to 50x20",
                "links scanned 50x20",
                "emulator wrote ok",
                "links scanned 50x20",
            ]
        );
        assert_eq!(
            *resizes.borrow(),
            vec![Dimensions::new(30, 10), Dimensions::new(50, 20)]
        );
        assert_eq!(node.frame().unwrap().dimensions, Dimensions::new(50, 20));

        log.borrow_mut().clear();
        session.dispose().unwrap();
        assert_eq!(
            *log.borrow(),
            vec!["emulator released", "links released", "fit released"]
        );
        assert!(!node.is_attached());
    }

    #[test]
    fn test_injected_parts_released_after_failed_open() {
        let log = Log::default();
        let target = Rc::new(RefCell::new(Dimensions::new(30, 10)));
        let node = HeadlessSurface::new(800.0, 400.0);
        let _other = open_on(&node);
        let mut session = injected(&log, &target);

        assert!(session.open(node.clone()).is_err());
        assert!(log.borrow().is_empty());

        drop(session);
        assert_eq!(
            *log.borrow(),
            vec!["emulator released", "links released", "fit released"]
        );
    }
}
