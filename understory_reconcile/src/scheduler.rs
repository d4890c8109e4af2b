// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Host services: the dirty set, the two timers, and the flushes they drive.
//!
//! Updates are computed in one phase and delivered in another:
//!
//! - [`Engine::flush_updates`] drains the dirty set ancestor-first and runs
//!   every boundary's update routine. Instructions and lifecycle calls pile up.
//! - [`Engine::flush_render`] hands the accumulated instructions to the
//!   [`Renderer`](crate::Renderer) (removals, then moves in reverse tree
//!   order, then the rest in tree order) and runs the lifecycle hooks in tree
//!   order.
//!
//! Each phase runs synchronously or behind its own [`DelayedTask`], armed
//! from the engine's [`Clock`]. A task is only ever re-armed tighter. The host
//! event loop calls [`Engine::run_due`] at [`Engine::next_deadline`].

use alloc::boxed::Box;
use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::Cell;
use core::fmt;
use core::mem;

use hashbrown::HashMap;
use understory_view_tree::NodeId;

use crate::boundary::{BoundaryId, MountState, UpdateBag};
use crate::component::{ChangeSet, Effects};
use crate::engine::Engine;
use crate::error::Error;
use crate::instruction::{Change, Instruction, InstructionBatch};
use crate::settings::{Force, Timing};
use crate::value::Props;

/// Deferred lifecycle hook invocation.
#[derive(Debug)]
pub(crate) enum LifecycleCall {
    Mount,
    Update(ChangeSet),
    Moved,
    UpdateMoved(ChangeSet),
}

/// A cancellable deadline.
///
/// Arming an armed task only ever moves the deadline earlier.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct DelayedTask {
    due: Option<u64>,
}

impl DelayedTask {
    /// Arm for `at`, unless already due earlier. Returns true if the deadline changed.
    pub fn arm(&mut self, at: u64) -> bool {
        match self.due {
            Some(due) if due <= at => false,
            _ => {
                self.due = Some(at);
                true
            }
        }
    }

    /// Disarm.
    pub fn cancel(&mut self) {
        self.due = None;
    }

    /// Current deadline.
    pub fn due(&self) -> Option<u64> {
        self.due
    }

    /// Returns true if armed for `now` or earlier.
    pub fn is_due(&self, now: u64) -> bool {
        self.due.is_some_and(|due| due <= now)
    }
}

/// Time source for the timers, in milliseconds.
pub trait Clock {
    /// Current time.
    fn now(&self) -> u64;
}

/// A clock that only moves when told to. Clones share the same time.
#[derive(Clone, Debug, Default)]
pub struct ManualClock(Rc<Cell<u64>>);

impl ManualClock {
    /// A clock at time zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Jump to `now`.
    pub fn set(&self, now: u64) {
        self.0.set(now);
    }

    /// Move forward by `ms`.
    pub fn advance(&self, ms: u64) {
        self.0.set(self.0.get().saturating_add(ms));
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.0.get()
    }
}

/// What one [`Engine::flush_updates`] did, passed to update-done listeners.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct UpdateSummary {
    /// Update routine invocations.
    pub boundaries_updated: u32,
    /// Component renders, re-renders included.
    pub renders: u32,
}

type Listener = Box<dyn FnMut(&UpdateSummary)>;

#[derive(Default)]
pub(crate) struct HostServices {
    /// Boundaries flagged dirty, in request order.
    pub(crate) dirty: Vec<BoundaryId>,
    pub(crate) instructions: InstructionBatch,
    pub(crate) lifecycle: Vec<(BoundaryId, LifecycleCall)>,
    pub(crate) update_task: DelayedTask,
    pub(crate) render_task: DelayedTask,
    pub(crate) flushing: bool,
    pub(crate) rendering: bool,
    pub(crate) listeners: Vec<Listener>,
    pub(crate) summary: UpdateSummary,
    /// Delivered instructions, kept while no renderer is set.
    pub(crate) flushed: Vec<Instruction>,
}

impl fmt::Debug for HostServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostServices")
            .field("dirty", &self.dirty)
            .field("instructions", &self.instructions)
            .field("lifecycle", &self.lifecycle.len())
            .field("update_task", &self.update_task)
            .field("render_task", &self.render_task)
            .field("flushing", &self.flushing)
            .field("rendering", &self.rendering)
            .field("listeners", &self.listeners.len())
            .field("summary", &self.summary)
            .field("flushed", &self.flushed.len())
            .finish()
    }
}

impl Engine {
    /// Merge `bag` into the boundary's pending bag and flag it dirty once.
    /// Arms the update task; never flushes.
    pub(crate) fn queue_update(&mut self, b: BoundaryId, bag: UpdateBag) {
        let timing = self.settings.update_timing;
        self.queue_update_with(b, bag, timing);
    }

    fn queue_update_with(&mut self, b: BoundaryId, bag: UpdateBag, timing: Timing) {
        let Some(boundary) = self.boundaries.get_mut(b) else {
            return;
        };
        if boundary.state == MountState::Destroyed {
            return;
        }
        boundary.pending.merge(bag);
        if !boundary.dirty {
            boundary.dirty = true;
            self.host.dirty.push(b);
        }
        if let Timing::After(ms) = timing {
            if !self.host.flushing {
                let at = self.clock.now().saturating_add(u64::from(ms));
                self.host.update_task.arm(at);
            }
        }
    }

    /// Flush now if updates are synchronous and no flush is running.
    pub(crate) fn kick(&mut self) -> Result<(), Error> {
        if self.settings.update_timing == Timing::Sync
            && !self.host.flushing
            && !self.host.rendering
            && !self.host.dirty.is_empty()
        {
            self.flush_updates()
        } else {
            Ok(())
        }
    }

    pub(crate) fn add_to_updates(&mut self, b: BoundaryId, bag: UpdateBag) -> Result<(), Error> {
        self.queue_update(b, bag);
        self.kick()
    }

    /// Schedule an update of `b`. Unknown or destroyed boundaries are ignored.
    pub fn request_update(&mut self, b: BoundaryId, force: Force) -> Result<(), Error> {
        self.add_to_updates(b, UpdateBag::forced(force))
    }

    /// Schedule an update of `b` with a one-off timing.
    ///
    /// A delay can only pull an armed update task earlier. `Timing::Sync`
    /// flushes right away unless a flush is already running.
    pub fn request_update_with(
        &mut self,
        b: BoundaryId,
        force: Force,
        timing: Timing,
    ) -> Result<(), Error> {
        self.queue_update_with(b, UpdateBag::forced(force), timing);
        if timing == Timing::Sync && !self.host.flushing && !self.host.rendering {
            self.flush_updates()
        } else {
            Ok(())
        }
    }

    /// Replace the state of `b` and schedule an update.
    pub fn set_state(&mut self, b: BoundaryId, state: Props) -> Result<(), Error> {
        self.queue_state(b, state);
        self.kick()
    }

    fn queue_state(&mut self, b: BoundaryId, state: Props) {
        let Some(parts) = self.source_parts_mut(b) else {
            return;
        };
        let before = mem::replace(&mut parts.state, state);
        self.queue_update(
            b,
            UpdateBag {
                state: Some(before),
                ..UpdateBag::default()
            },
        );
    }

    /// Run the update routine of every dirty boundary, ancestors first.
    ///
    /// Boundaries dirtied while flushing are processed before this returns.
    /// On a render error the remaining boundaries stay dirty for the next flush.
    pub fn flush_updates(&mut self) -> Result<(), Error> {
        if self.host.flushing {
            return Ok(());
        }
        self.host.flushing = true;
        self.host.update_task.cancel();
        let result = self.drain_dirty();
        self.host.flushing = false;
        result?;

        let summary = mem::take(&mut self.host.summary);
        if summary != UpdateSummary::default() {
            tracing::debug!(
                boundaries = summary.boundaries_updated,
                renders = summary.renders,
                "updates flushed"
            );
            for listener in &mut self.host.listeners {
                listener(&summary);
            }
        }
        self.schedule_render()
    }

    fn drain_dirty(&mut self) -> Result<(), Error> {
        while !self.host.dirty.is_empty() {
            let mut batch = mem::take(&mut self.host.dirty);
            batch.retain(|b| self.boundaries.get(*b).is_some_and(|x| x.dirty));
            batch.sort_by_cached_key(|b| self.sort_key(*b));
            let mut rest = batch.into_iter();
            while let Some(b) = rest.next() {
                // An ancestor's pass may have updated it already.
                if !self.boundaries.get(b).is_some_and(|x| x.dirty) {
                    continue;
                }
                if let Err(err) = self.update_boundary(b, Force::None, None) {
                    self.host.dirty.extend(rest);
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    pub(crate) fn schedule_render(&mut self) -> Result<(), Error> {
        if self.host.instructions.is_empty() && self.host.lifecycle.is_empty() {
            return Ok(());
        }
        match self.settings.render_timing {
            Timing::Sync => self.flush_render(),
            Timing::After(ms) => {
                let at = self.clock.now().saturating_add(u64::from(ms));
                self.host.render_task.arm(at);
                Ok(())
            }
        }
    }

    /// Deliver accumulated instructions, then run deferred lifecycle hooks.
    ///
    /// Updates requested by the hooks are scheduled like any other.
    pub fn flush_render(&mut self) -> Result<(), Error> {
        if self.host.rendering {
            return Ok(());
        }
        self.host.rendering = true;
        self.host.render_task.cancel();
        let records = self.host.instructions.take();
        let calls = mem::take(&mut self.host.lifecycle);
        tracing::debug!(
            instructions = records.len(),
            lifecycle = calls.len(),
            "flushing to the backend"
        );
        self.deliver(records);
        self.run_lifecycle(calls);
        self.host.rendering = false;

        if self.host.dirty.is_empty() {
            return Ok(());
        }
        match self.settings.update_timing {
            Timing::Sync => self.flush_updates(),
            Timing::After(ms) => {
                let at = self.clock.now().saturating_add(u64::from(ms));
                self.host.update_task.arm(at);
                Ok(())
            }
        }
    }

    fn deliver(&mut self, records: Vec<Instruction>) {
        let position: HashMap<NodeId, usize> = self
            .tree
            .depth_first()
            .into_iter()
            .enumerate()
            .map(|(i, node)| (node, i))
            .collect();
        let at = |node: NodeId| position.get(&node).copied().unwrap_or(usize::MAX);

        let mut removals = Vec::new();
        let mut moves = Vec::new();
        let mut rest = Vec::new();
        for record in records {
            if record.change.contains(Change::REMOVE) {
                removals.push(record);
                continue;
            }
            if !self.tree.is_alive(record.node) {
                continue;
            }
            if record.change.contains(Change::MOVE) && !record.change.contains(Change::CREATE) {
                let mut moved = Instruction::new(record.node, record.kind, Change::MOVE);
                if record.kind.is_transparent() {
                    moved.hosts = self.in_flow_handles(record.node);
                }
                moves.push(moved);
                let remaining = record.change.difference(Change::MOVE);
                if !remaining.is_empty() {
                    rest.push(Instruction {
                        change: remaining,
                        ..record
                    });
                }
            } else {
                rest.push(record);
            }
        }
        moves.sort_by_key(|m| core::cmp::Reverse(at(m.node)));
        rest.sort_by_key(|r| at(r.node));

        for instruction in removals.into_iter().chain(moves).chain(rest) {
            match self.renderer.as_mut() {
                Some(renderer) => {
                    if let Some(handle) = renderer.apply(&instruction, &self.tree) {
                        self.tree.set_handle(instruction.node, Some(handle));
                    }
                }
                None => self.host.flushed.push(instruction),
            }
        }
    }

    fn run_lifecycle(&mut self, mut calls: Vec<(BoundaryId, LifecycleCall)>) {
        calls.retain(|(b, _)| self.boundaries.contains(*b));
        calls.sort_by_cached_key(|(b, _)| self.sort_key(*b));
        for (b, call) in calls {
            let mut fx = Effects::default();
            self.with_instance(b, |instance| match &call {
                LifecycleCall::Mount => instance.on_mount(&mut fx),
                LifecycleCall::Update(changes) => instance.on_update(changes, &mut fx),
                LifecycleCall::Moved => instance.on_moved(&mut fx),
                LifecycleCall::UpdateMoved(changes) => instance.on_update_and_move(changes, &mut fx),
            });
            if fx.is_empty() {
                continue;
            }
            if let Some(state) = fx.state {
                self.queue_state(b, state);
            }
            if let Some(force) = fx.update {
                self.queue_update(b, UpdateBag::forced(force));
            }
        }
    }

    /// Run whichever phase is due at the clock's current time.
    pub fn run_due(&mut self) -> Result<(), Error> {
        let now = self.clock.now();
        if self.host.update_task.is_due(now) {
            self.flush_updates()?;
        }
        if self.host.render_task.is_due(self.clock.now()) {
            self.flush_render()?;
        }
        Ok(())
    }

    /// Earliest armed deadline of either phase.
    pub fn next_deadline(&self) -> Option<u64> {
        match (self.host.update_task.due(), self.host.render_task.due()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Register a listener called after every flush that updated something.
    pub fn on_update_done(&mut self, listener: impl FnMut(&UpdateSummary) + 'static) {
        self.host.listeners.push(Box::new(listener));
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec;
    use core::cell::RefCell;

    use super::*;
    use crate::component::{Component, ComponentType, RenderCx, Rendered};
    use crate::def::Def;
    use crate::error::RenderError;
    use crate::settings::Settings;
    use crate::value::Value;
    use understory_view_tree::NodeKind;

    #[test]
    fn arming_only_tightens() {
        let mut task = DelayedTask::default();
        assert!(task.arm(10));
        assert!(!task.arm(20));
        assert_eq!(task.due(), Some(10));
        assert!(task.arm(5));
        assert!(!task.is_due(4));
        assert!(task.is_due(5));
        task.cancel();
        assert_eq!(task.due(), None);
    }

    fn counting(renders: &Rc<Cell<u32>>) -> ComponentType {
        let r = renders.clone();
        ComponentType::function("counting", move |_| {
            r.set(r.get() + 1);
            Ok(Rendered::tree(Def::empty()))
        })
    }

    #[test]
    fn repeated_requests_before_a_flush_update_once() {
        let renders = Rc::new(Cell::new(0_u32));
        let ty = counting(&renders);
        let clock = ManualClock::new();
        let mut engine = Engine::with_clock(Settings::default(), Rc::new(clock.clone()));
        let summaries = Rc::new(RefCell::new(Vec::new()));
        let s = summaries.clone();
        engine.on_update_done(move |summary| s.borrow_mut().push(*summary));

        engine.render(Def::component(&ty)).unwrap();
        assert_eq!(renders.get(), 0, "nothing runs before the timer");
        assert_eq!(engine.next_deadline(), Some(0));
        engine.run_due().unwrap();
        assert_eq!(renders.get(), 1);
        assert_eq!(engine.next_deadline(), None, "both phases ran");

        let b = engine.boundaries_of(&ty)[0];
        for _ in 0..3 {
            engine.request_update(b, Force::All).unwrap();
        }
        clock.advance(1);
        engine.run_due().unwrap();
        assert_eq!(renders.get(), 2);
        assert_eq!(
            summaries.borrow().last().copied(),
            Some(UpdateSummary {
                boundaries_updated: 1,
                renders: 1,
            })
        );
    }

    #[test]
    fn one_off_timing_pulls_the_update_earlier() {
        let renders = Rc::new(Cell::new(0_u32));
        let ty = counting(&renders);
        let clock = ManualClock::new();
        let mut settings = Settings::default();
        settings.update_timing = Timing::After(100);
        settings.render_timing = Timing::After(100);
        let mut engine = Engine::with_clock(settings, Rc::new(clock.clone()));
        engine.render(Def::component(&ty)).unwrap();
        assert_eq!(engine.next_deadline(), Some(100));

        engine
            .request_update_with(engine.root_boundary(), Force::All, Timing::After(10))
            .unwrap();
        assert_eq!(engine.next_deadline(), Some(10));
        clock.set(10);
        engine.run_due().unwrap();
        assert_eq!(renders.get(), 1);
        // Delivery keeps its own, later deadline.
        assert_eq!(engine.next_deadline(), Some(110));
    }

    #[test]
    fn ancestors_update_before_descendants() {
        let order = Rc::new(RefCell::new(Vec::new()));
        let o = order.clone();
        let leaf = ComponentType::function("leaf", move |_| {
            o.borrow_mut().push("leaf");
            Ok(Rendered::tree(Def::empty()))
        });
        let o = order.clone();
        let l = leaf.clone();
        let branch = ComponentType::function("branch", move |_| {
            o.borrow_mut().push("branch");
            Ok(Rendered::tree(Def::component(&l)))
        });
        let clock = ManualClock::new();
        let mut engine = Engine::with_clock(Settings::default(), Rc::new(clock.clone()));
        engine.render(Def::component(&branch)).unwrap();
        engine.run_due().unwrap();
        order.borrow_mut().clear();

        let leaf_b = engine.boundaries_of(&leaf)[0];
        let branch_b = engine.boundaries_of(&branch)[0];
        engine.request_update(leaf_b, Force::All).unwrap();
        engine.request_update(branch_b, Force::All).unwrap();
        engine.run_due().unwrap();
        // The leaf's pending force makes it render inside the branch's pass,
        // so the dirty set has nothing left for it.
        assert_eq!(*order.borrow(), vec!["branch", "leaf"]);
    }

    struct Ticker {
        ticks: Rc<Cell<u32>>,
    }

    impl Component for Ticker {
        fn render(&mut self, cx: &mut RenderCx<'_>) -> Result<Def, RenderError> {
            let n = match cx.state().get("n") {
                Some(Value::Int(n)) => *n,
                _ => 0,
            };
            Ok(Def::text(if n < 3 { "ticking" } else { "done" }).into())
        }

        fn on_mount(&mut self, fx: &mut Effects) {
            fx.set_state(Props::new().with("n", 1));
        }

        fn on_update(&mut self, changes: &ChangeSet, fx: &mut Effects) {
            self.ticks.set(self.ticks.get() + 1);
            if let Some((_, after)) = &changes.state {
                if let Some(Value::Int(n)) = after.get("n") {
                    if *n < 3 {
                        fx.set_state(Props::new().with("n", *n + 1));
                    }
                }
            }
        }
    }

    #[test]
    fn hook_effects_schedule_further_updates() {
        let ticks = Rc::new(Cell::new(0_u32));
        let t = ticks.clone();
        let ty = ComponentType::stateful("ticker", move |_| Ticker { ticks: t.clone() });
        let mut engine = Engine::new(Settings::synchronous());
        engine.render(Def::component(&ty)).unwrap();
        assert_eq!(ticks.get(), 3, "updated for n = 1, 2, 3");
        let b = engine.boundaries_of(&ty)[0];
        assert!(matches!(engine.state_of(b).unwrap().get("n"), Some(Value::Int(3))));
    }

    #[test]
    fn render_errors_propagate_and_keep_the_boundary_dirty() {
        let fail = Rc::new(Cell::new(true));
        let f = fail.clone();
        let flaky = ComponentType::function("flaky", move |_| {
            if f.get() {
                Err(RenderError::new("boom"))
            } else {
                Ok(Rendered::tree(Def::empty()))
            }
        });
        let mut engine = Engine::new(Settings::synchronous());
        let err = engine.render(Def::component(&flaky)).unwrap_err();
        assert!(matches!(&err, Error::Render { component, .. } if &**component == "flaky"));

        fail.set(false);
        let b = engine.boundaries_of(&flaky)[0];
        engine.request_update(b, Force::None).unwrap();
        assert_eq!(engine.boundary_state(b), Some(MountState::Mounted));
    }

    #[test]
    fn updates_cut_short_by_a_render_error_arrive_with_the_next_pass() {
        let flaky = ComponentType::function("flaky", |cx| {
            if matches!(cx.props().get("p"), Some(Value::Int(2))) {
                return Err(RenderError::new("boom"));
            }
            Ok(Rendered::tree(Def::empty()))
        });
        let tree = |p: i32, x: i32| {
            Def::fragment([
                Def::from(Def::component(&flaky).prop("p", p)),
                Def::from(Def::element("div").prop("x", x)),
            ])
        };
        let mut engine = Engine::new(Settings::synchronous());
        engine.render(tree(1, 1)).unwrap();
        engine.take_flushed();

        assert!(engine.render(tree(2, 2)).is_err());
        engine.render(tree(3, 2)).unwrap();
        let updates: Vec<Instruction> = engine
            .take_flushed()
            .into_iter()
            .filter(|i| i.change.contains(Change::UPDATE))
            .collect();
        assert_eq!(updates.len(), 1, "the div still owes its update");
        let diff = updates[0].diff.as_ref().expect("a property diff");
        assert!(matches!(&diff.set[..], [(name, Value::Int(2))] if &**name == "x"));
    }

    #[test]
    fn moves_cut_short_by_a_render_error_are_still_delivered() {
        let flaky = ComponentType::function("flaky", |cx| {
            if matches!(cx.props().get("p"), Some(Value::Int(2))) {
                return Err(RenderError::new("boom"));
            }
            Ok(Rendered::tree(Def::empty()))
        });
        let tree = |p: i32, keys: [&str; 2]| {
            Def::fragment([
                Def::from(Def::component(&flaky).prop("p", p)),
                Def::from(Def::element("item").key(keys[0])),
                Def::from(Def::element("item").key(keys[1])),
            ])
        };
        let mut engine = Engine::new(Settings::synchronous());
        engine.render(tree(1, ["a", "b"])).unwrap();
        engine.take_flushed();

        assert!(engine.render(tree(2, ["b", "a"])).is_err());
        engine.render(tree(3, ["b", "a"])).unwrap();
        let moves = engine
            .take_flushed()
            .iter()
            .filter(|i| i.kind == NodeKind::Host && i.change.contains(Change::MOVE))
            .count();
        assert_eq!(moves, 2);
    }
}
