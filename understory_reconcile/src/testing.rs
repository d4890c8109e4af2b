// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! A recording backend for tests.

use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::{Cell, RefCell};

use understory_view_tree::{BackendHandle, NodeKind, ViewTree};

use crate::instruction::{Change, Instruction, NodeData, Renderer};

/// Logs every instruction and hands out fresh handles for created hosts.
#[derive(Clone, Debug, Default)]
pub(crate) struct Recorder {
    pub(crate) log: Rc<RefCell<Vec<Instruction>>>,
    next: Rc<Cell<u64>>,
}

impl Renderer for Recorder {
    fn apply(
        &mut self,
        instruction: &Instruction,
        _tree: &ViewTree<NodeData>,
    ) -> Option<BackendHandle> {
        self.log.borrow_mut().push(instruction.clone());
        if !instruction.change.contains(Change::CREATE) || instruction.kind != NodeKind::Host {
            return None;
        }
        instruction.handle.or_else(|| {
            self.next.set(self.next.get() + 1);
            Some(BackendHandle(self.next.get()))
        })
    }
}
