// SPDX-License-Identifier: CEPL-1.0
//! A fake GPU with an explicit timeline, plus a scripted window host.
//!
//! Submitted work never finishes on its own. It completes, in submission order,
//! only when the CPU waits on a fence covering it or waits for idle. That makes
//! every missing wait visible: an unguarded write to an image whose previous
//! submission has not completed is recorded as a violation.
#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use anyhow::{anyhow, bail, Result};
use lumen_render::{
    AcquireOutcome, BundleInfo, FrameBackend, PresentOutcome, PresentationHost, RenderSize,
    SwapchainBundle,
};

pub const MOCK_FORMAT: i32 = 50;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    WaitFence(usize),
    ResetFence(usize),
    Acquired(u32),
    AcquireOutOfDate,
    Update(u32),
    Submit { id: u64, image: u32, fence: usize },
    Present(u32),
    WaitIdle,
    CreateBundle { generation: u32, size: RenderSize },
    DestroyBundle { generation: u32 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FenceState {
    Signaled,
    Unsignaled,
    Pending(u64),
    Destroyed,
}

#[derive(Clone, Copy, Debug)]
pub enum ScriptedAcquire {
    Image(u32),
    Suboptimal(u32),
    OutOfDate,
    Fail,
}

#[derive(Debug)]
struct Submission {
    id: u64,
    image: u32,
    fence: usize,
    done: bool,
}

#[derive(Debug, Default)]
pub struct Timeline {
    pub events: Vec<Event>,
    fences: Vec<FenceState>,
    pub semaphores_created: usize,
    pub semaphores_destroyed: usize,
    submissions: Vec<Submission>,
    last_reader: HashMap<u32, u64>,
    pub max_outstanding: usize,
    pub violations: Vec<String>,
    pub live_bundles: i32,
    generation: u32,
}

impl Timeline {
    fn complete_through(&mut self, id: u64) {
        for sub in self.submissions.iter_mut().filter(|s| !s.done && s.id <= id) {
            sub.done = true;
            if self.fences[sub.fence] == FenceState::Pending(sub.id) {
                self.fences[sub.fence] = FenceState::Signaled;
            }
        }
    }

    fn complete_all(&mut self) {
        if let Some(last) = self.submissions.last().map(|s| s.id) {
            self.complete_through(last);
        }
    }

    pub fn outstanding(&self) -> usize {
        self.submissions.iter().filter(|s| !s.done).count()
    }

    pub fn submissions(&self) -> usize {
        self.submissions.len()
    }

    pub fn fences_created(&self) -> usize {
        self.fences.len()
    }

    pub fn fences_alive(&self) -> usize {
        self.fences
            .iter()
            .filter(|f| **f != FenceState::Destroyed)
            .count()
    }

    pub fn submitted_images(&self) -> Vec<u32> {
        self.submissions.iter().map(|s| s.image).collect()
    }

    /// Event indices matching `pred`, in order.
    pub fn positions(&self, pred: impl Fn(&Event) -> bool) -> Vec<usize> {
        self.events
            .iter()
            .enumerate()
            .filter(|(_, e)| pred(e))
            .map(|(i, _)| i)
            .collect()
    }
}

pub struct MockBundle {
    generation: u32,
    info: BundleInfo,
    timeline: Rc<RefCell<Timeline>>,
}

impl MockBundle {
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl SwapchainBundle for MockBundle {
    fn info(&self) -> BundleInfo {
        self.info
    }
}

impl Drop for MockBundle {
    fn drop(&mut self) {
        let mut t = self.timeline.borrow_mut();
        t.live_bundles -= 1;
        t.events.push(Event::DestroyBundle {
            generation: self.generation,
        });
    }
}

pub struct MockGpu {
    pub timeline: Rc<RefCell<Timeline>>,
    pub image_count: usize,
    pub acquire_script: VecDeque<ScriptedAcquire>,
    pub present_script: VecDeque<PresentOutcome>,
    /// Corrupt the next bundle's framebuffer count.
    pub mismatch_next_bundle: bool,
    pub fail_next_bundle: bool,
    next_image: u32,
    next_semaphore: usize,
}

impl MockGpu {
    pub fn new(image_count: usize) -> Self {
        Self {
            timeline: Rc::new(RefCell::new(Timeline::default())),
            image_count,
            acquire_script: VecDeque::new(),
            present_script: VecDeque::new(),
            mismatch_next_bundle: false,
            fail_next_bundle: false,
            next_image: 0,
            next_semaphore: 0,
        }
    }

    pub fn timeline(&self) -> Rc<RefCell<Timeline>> {
        Rc::clone(&self.timeline)
    }

    fn round_robin(&mut self) -> u32 {
        let image = self.next_image;
        self.next_image = (self.next_image + 1) % self.image_count as u32;
        image
    }
}

impl FrameBackend for MockGpu {
    type Fence = usize;
    type Semaphore = usize;
    type Bundle = MockBundle;

    fn create_fence(&mut self, signaled: bool) -> Result<usize> {
        let mut t = self.timeline.borrow_mut();
        t.fences.push(if signaled {
            FenceState::Signaled
        } else {
            FenceState::Unsignaled
        });
        Ok(t.fences.len() - 1)
    }

    fn create_semaphore(&mut self) -> Result<usize> {
        self.timeline.borrow_mut().semaphores_created += 1;
        self.next_semaphore += 1;
        Ok(self.next_semaphore)
    }

    fn destroy_fence(&mut self, fence: usize) {
        let mut t = self.timeline.borrow_mut();
        let state = t.fences[fence];
        if let FenceState::Pending(id) = state {
            t.violations
                .push(format!("fence {fence} destroyed with submission {id} pending"));
        }
        t.fences[fence] = FenceState::Destroyed;
    }

    fn destroy_semaphore(&mut self, _semaphore: usize) {
        self.timeline.borrow_mut().semaphores_destroyed += 1;
    }

    fn wait_fence(&mut self, fence: usize) -> Result<()> {
        let mut t = self.timeline.borrow_mut();
        t.events.push(Event::WaitFence(fence));
        let state = t.fences[fence];
        match state {
            FenceState::Signaled => Ok(()),
            FenceState::Pending(id) => {
                t.complete_through(id);
                Ok(())
            }
            FenceState::Unsignaled => bail!("deadlock: fence {fence} is unsignaled with no work"),
            FenceState::Destroyed => bail!("wait on destroyed fence {fence}"),
        }
    }

    fn reset_fence(&mut self, fence: usize) -> Result<()> {
        let mut t = self.timeline.borrow_mut();
        t.events.push(Event::ResetFence(fence));
        let state = t.fences[fence];
        if let FenceState::Pending(id) = state {
            t.violations
                .push(format!("fence {fence} reset while submission {id} pending"));
        }
        t.fences[fence] = FenceState::Unsignaled;
        Ok(())
    }

    fn wait_idle(&mut self) -> Result<()> {
        let mut t = self.timeline.borrow_mut();
        t.events.push(Event::WaitIdle);
        t.complete_all();
        Ok(())
    }

    fn create_bundle(&mut self, size: RenderSize) -> Result<MockBundle> {
        if std::mem::take(&mut self.fail_next_bundle) {
            return Err(anyhow!("create_swapchain: ERROR_OUT_OF_DEVICE_MEMORY"));
        }
        let mut t = self.timeline.borrow_mut();
        t.generation += 1;
        let generation = t.generation;
        t.live_bundles += 1;
        t.events.push(Event::CreateBundle { generation, size });
        drop(t);

        self.next_image = 0;
        let n = self.image_count;
        let framebuffers = if std::mem::take(&mut self.mismatch_next_bundle) {
            n - 1
        } else {
            n
        };
        Ok(MockBundle {
            generation,
            info: BundleInfo {
                extent: size,
                format: MOCK_FORMAT,
                images: n,
                views: n,
                framebuffers,
                command_buffers: n,
                uniform_buffers: n,
            },
            timeline: Rc::clone(&self.timeline),
        })
    }

    fn acquire(&mut self, _bundle: &MockBundle, _signal: usize) -> Result<AcquireOutcome> {
        let outcome = match self.acquire_script.pop_front() {
            Some(ScriptedAcquire::Image(i)) => AcquireOutcome::Ready {
                image: i,
                suboptimal: false,
            },
            Some(ScriptedAcquire::Suboptimal(i)) => AcquireOutcome::Ready {
                image: i,
                suboptimal: true,
            },
            Some(ScriptedAcquire::OutOfDate) => AcquireOutcome::OutOfDate,
            Some(ScriptedAcquire::Fail) => bail!("ERROR_DEVICE_LOST"),
            None => AcquireOutcome::Ready {
                image: self.round_robin(),
                suboptimal: false,
            },
        };
        let mut t = self.timeline.borrow_mut();
        t.events.push(match outcome {
            AcquireOutcome::Ready { image, .. } => Event::Acquired(image),
            AcquireOutcome::OutOfDate => Event::AcquireOutOfDate,
        });
        Ok(outcome)
    }

    fn update_frame_data(&mut self, _bundle: &mut MockBundle, image: u32) -> Result<()> {
        let mut t = self.timeline.borrow_mut();
        t.events.push(Event::Update(image));
        let reader = t.last_reader.get(&image).copied();
        if let Some(reader) = reader {
            let pending = t.submissions.iter().any(|s| s.id == reader && !s.done);
            if pending {
                t.violations.push(format!(
                    "image {image} written while submission {reader} still reads it"
                ));
            }
        }
        Ok(())
    }

    fn submit(
        &mut self,
        _bundle: &MockBundle,
        image: u32,
        _wait: usize,
        _signal: usize,
        fence: usize,
    ) -> Result<()> {
        let mut t = self.timeline.borrow_mut();
        let state = t.fences[fence];
        if state != FenceState::Unsignaled {
            t.violations
                .push(format!("submit with fence {fence} in state {state:?}"));
        }
        let id = t.submissions.len() as u64 + 1;
        t.submissions.push(Submission {
            id,
            image,
            fence,
            done: false,
        });
        t.fences[fence] = FenceState::Pending(id);
        t.last_reader.insert(image, id);
        t.events.push(Event::Submit { id, image, fence });
        let outstanding = t.outstanding();
        t.max_outstanding = t.max_outstanding.max(outstanding);
        Ok(())
    }

    fn present(&mut self, _bundle: &MockBundle, image: u32, _wait: usize) -> Result<PresentOutcome> {
        self.timeline.borrow_mut().events.push(Event::Present(image));
        Ok(self
            .present_script
            .pop_front()
            .unwrap_or(PresentOutcome::Presented))
    }
}

/// Window stand-in. Each `poll_events`/`wait_events` call moves to the next
/// scripted size, if any.
pub struct MockHost {
    pub size: RenderSize,
    pub upcoming_sizes: VecDeque<RenderSize>,
    pub polls: usize,
    pub resized: bool,
    pub closing: bool,
    /// Start closing once this many polls have happened.
    pub close_after_polls: Option<usize>,
}

impl MockHost {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            size: RenderSize::new(width, height),
            upcoming_sizes: VecDeque::new(),
            polls: 0,
            resized: false,
            closing: false,
            close_after_polls: None,
        }
    }
}

impl PresentationHost for MockHost {
    fn poll_events(&mut self) {
        self.polls += 1;
        if let Some(next) = self.upcoming_sizes.pop_front() {
            self.size = next;
        }
        if self.close_after_polls.is_some_and(|n| self.polls >= n) {
            self.closing = true;
        }
    }

    fn should_close(&self) -> bool {
        self.closing
    }

    fn drawable_size(&self) -> RenderSize {
        self.size
    }

    fn take_resize_signal(&mut self) -> bool {
        std::mem::take(&mut self.resized)
    }
}
