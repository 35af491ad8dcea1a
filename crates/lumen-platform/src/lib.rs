// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
//! winit window driven by pumping events from the render loop.

use std::mem;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use lumen_render::{PresentationHost, RenderSize};
use tracing::{debug, info};

pub use winit;

use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    error::OsError,
    event::{ElementState, WindowEvent},
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::Key,
    platform::pump_events::{EventLoopExtPumpEvents, PumpStatus},
    raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle},
    window::{Window, WindowId},
};

/// Longest a single blocking `wait_events` may sleep.
const WAIT_SLICE: Duration = Duration::from_millis(100);

/// Upper bound on pumps while waiting for the window to come up.
const STARTUP_PUMPS: usize = 200;

/// Window bookkeeping fed by winit callbacks.
pub struct WindowState {
    title: String,
    requested: RenderSize,
    window: Option<Window>,
    size: RenderSize,
    resized: bool,
    close_requested: bool,
    focus_change: Option<bool>,
    keys: Vec<char>,
    create_error: Option<OsError>,
}

impl WindowState {
    pub fn new(title: impl Into<String>, requested: RenderSize) -> Self {
        Self {
            title: title.into(),
            requested,
            window: None,
            size: requested,
            resized: false,
            close_requested: false,
            focus_change: None,
            keys: Vec::new(),
            create_error: None,
        }
    }

    /// Record a new drawable size. Only real changes raise the resize signal.
    pub fn record_resize(&mut self, size: RenderSize) {
        if size != self.size {
            debug!("window: resized {}x{}", size.width, size.height);
            self.size = size;
            self.resized = true;
        }
    }

    pub fn record_close(&mut self) {
        if !self.close_requested {
            info!("window: close requested");
        }
        self.close_requested = true;
    }

    /// Only the latest focus state since the last take is kept.
    pub fn record_focus(&mut self, focused: bool) {
        debug!("window: focused={focused}");
        self.focus_change = Some(focused);
    }

    /// Character keys, lowercased.
    pub fn record_key(&mut self, key: char) {
        self.keys.push(key.to_ascii_lowercase());
    }

    pub fn size(&self) -> RenderSize {
        self.size
    }

    pub fn close_requested(&self) -> bool {
        self.close_requested
    }

    pub fn take_resized(&mut self) -> bool {
        mem::take(&mut self.resized)
    }

    pub fn take_focus_change(&mut self) -> Option<bool> {
        self.focus_change.take()
    }

    pub fn take_keys(&mut self) -> Vec<char> {
        mem::take(&mut self.keys)
    }
}

impl ApplicationHandler for WindowState {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        let attrs = Window::default_attributes()
            .with_title(self.title.clone())
            .with_inner_size(PhysicalSize::new(
                self.requested.width,
                self.requested.height,
            ));
        match event_loop.create_window(attrs) {
            Ok(window) => {
                let s = window.inner_size();
                self.size = RenderSize::new(s.width, s.height);
                info!("window: created {}x{}", s.width, s.height);
                self.window = Some(window);
            }
            Err(e) => {
                self.create_error = Some(e);
                self.record_close();
            }
        }
    }

    fn window_event(&mut self, _event_loop: &ActiveEventLoop, window_id: WindowId, event: WindowEvent) {
        if let Some(window) = &self.window {
            if window_id != window.id() {
                return;
            }
        }
        match event {
            WindowEvent::CloseRequested | WindowEvent::Destroyed => self.record_close(),
            WindowEvent::Resized(s) => self.record_resize(RenderSize::new(s.width, s.height)),
            WindowEvent::Focused(focused) => self.record_focus(focused),
            WindowEvent::KeyboardInput { event, .. }
                if event.state == ElementState::Pressed && !event.repeat =>
            {
                if let Key::Character(s) = &event.logical_key {
                    if let Some(c) = s.chars().next() {
                        self.record_key(c);
                    }
                }
            }
            _ => {}
        }
    }
}

/// [`PresentationHost`] over a single winit window.
// Field order is drop order: the window goes before its event loop.
pub struct WindowHost {
    state: WindowState,
    event_loop: EventLoop<()>,
}

impl WindowHost {
    /// Open the window and pump until it exists.
    pub fn new(title: &str, width: u32, height: u32) -> Result<Self> {
        let event_loop = EventLoop::new()?;
        let mut host = Self {
            state: WindowState::new(title, RenderSize::new(width, height)),
            event_loop,
        };
        for _ in 0..STARTUP_PUMPS {
            host.pump(Some(Duration::ZERO));
            if let Some(e) = host.state.create_error.take() {
                return Err(anyhow!(e).context("create_window"));
            }
            if host.state.window.is_some() {
                // The initial size is not a resize.
                host.state.resized = false;
                return Ok(host);
            }
            if host.state.close_requested {
                break;
            }
        }
        bail!("window never became ready")
    }

    /// Raw handles for surface creation. Valid as long as this host lives.
    pub fn window_handles(&self) -> Result<(RawDisplayHandle, RawWindowHandle)> {
        let window = self.window()?;
        Ok((
            window.display_handle()?.as_raw(),
            window.window_handle()?.as_raw(),
        ))
    }

    /// Latest focus state reported since the previous call.
    pub fn take_focus_change(&mut self) -> Option<bool> {
        self.state.take_focus_change()
    }

    /// Keys pressed since the previous call, oldest first.
    pub fn take_keys(&mut self) -> Vec<char> {
        self.state.take_keys()
    }

    pub fn set_title(&self, title: &str) {
        if let Some(w) = &self.state.window {
            w.set_title(title);
        }
    }

    fn window(&self) -> Result<&Window> {
        self.state
            .window
            .as_ref()
            .ok_or_else(|| anyhow!("window is gone"))
    }

    fn pump(&mut self, timeout: Option<Duration>) {
        if let PumpStatus::Exit(code) = self.event_loop.pump_app_events(timeout, &mut self.state) {
            debug!("window: event loop exited ({code})");
            self.state.record_close();
        }
    }
}

impl PresentationHost for WindowHost {
    fn poll_events(&mut self) {
        self.pump(Some(Duration::ZERO));
    }

    fn wait_events(&mut self) {
        self.pump(Some(WAIT_SLICE));
    }

    fn should_close(&self) -> bool {
        self.state.close_requested()
    }

    fn drawable_size(&self) -> RenderSize {
        match &self.state.window {
            Some(w) => {
                let s = w.inner_size();
                RenderSize::new(s.width, s.height)
            }
            None => self.state.size(),
        }
    }

    fn take_resize_signal(&mut self) -> bool {
        self.state.take_resized()
    }
}
