//! Tee: fan one stream out to several consumers.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use slotmap::{new_key_type, SlotMap};
use spu_ir::Error;

use crate::module::Module;

new_key_type! {
    struct ChildKey;
}

/// Shared owner of the source and the per-child queues. Freed (with the
/// source) when the last child is dropped.
struct SplitterParent<M: Module> {
    source: M,
    queues: SlotMap<ChildKey, VecDeque<M::Frame>>,
}

impl<M: Module> SplitterParent<M> {
    /// Pull one sample from the source and hand it to every child.
    fn feed_children(&mut self) -> Result<(), Error> {
        if let Some(sample) = self.source.next()? {
            for (_, queue) in self.queues.iter_mut() {
                queue.push_back(sample);
            }
        }
        Ok(())
    }
}

/// One consumer of a shared source.
///
/// Children created through [`Splitter::split`] receive every sample the
/// source produces after they attach; samples are buffered per child, so
/// consumers may advance at different paces without re-pulling the
/// source.
pub struct Splitter<M: Module> {
    parent: Rc<RefCell<SplitterParent<M>>>,
    key: ChildKey,
}

impl<M: Module> Splitter<M> {
    /// Wrap a source in a splitter, creating the first consumer.
    pub fn new(source: M) -> Self {
        let mut queues = SlotMap::with_key();
        let key = queues.insert(VecDeque::new());
        Self {
            parent: Rc::new(RefCell::new(SplitterParent { source, queues })),
            key,
        }
    }

    /// Split off another consumer of the same source.
    pub fn split(&self) -> Splitter<M> {
        let key = self.parent.borrow_mut().queues.insert(VecDeque::new());
        Splitter {
            parent: Rc::clone(&self.parent),
            key,
        }
    }
}

impl<M: Module> Drop for Splitter<M> {
    fn drop(&mut self) {
        self.parent.borrow_mut().queues.remove(self.key);
    }
}

impl<M: Module> Module for Splitter<M> {
    type Frame = M::Frame;

    fn is_running(&self) -> bool {
        let parent = self.parent.borrow();
        !parent.queues[self.key].is_empty() || parent.source.is_running()
    }

    fn next(&mut self) -> Result<Option<M::Frame>, Error> {
        let mut parent = self.parent.borrow_mut();
        if parent.queues[self.key].is_empty() {
            parent.feed_children()?;
        }
        Ok(parent.queues[self.key].pop_front())
    }
}
