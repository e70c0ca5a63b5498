//! Derived-resource relationships used to decide when a resource is really gone.
//!
//! Records live in per-kind arenas addressed by the replay index the [`ResourceIndexTracker`]
//! handed out, so cascades walk plain vectors instead of hashing native handles.
//!
//! [`ResourceIndexTracker`]: crate::index::ResourceIndexTracker

#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct MemNode {
    parent: Option<usize>,
    children: Vec<usize>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct ProgramNode {
    /// Creates, retains and uses as a link input, minus releases.
    link_count: u32,
    linked_inputs: Vec<usize>,
    kernels: Vec<usize>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct KernelNode {
    program: Option<usize>,
    live: bool,
}

/// Outcome of dropping one reference to a program.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProgramRelease {
    /// Programs whose link count reached zero and that have no live kernels, in the order they
    /// died.
    pub dead_programs: Vec<usize>,
}

#[derive(Debug, Default, Clone)]
pub struct ResourceGraph {
    mems: Vec<Option<MemNode>>,
    programs: Vec<Option<ProgramNode>>,
    kernels: Vec<Option<KernelNode>>,
}

fn slot<T: Default>(arena: &mut Vec<Option<T>>, index: usize) -> &mut T {
    if arena.len() <= index {
        arena.resize_with(index + 1, || None);
    }
    arena[index].get_or_insert_with(T::default)
}

fn get<T>(arena: &[Option<T>], index: usize) -> Option<&T> {
    arena.get(index).and_then(Option::as_ref)
}

impl ResourceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_mem(&mut self, mem: usize) {
        slot(&mut self.mems, mem);
    }

    /// Records `child` as a sub-buffer of `parent`.
    pub fn add_sub_buffer(&mut self, child: usize, parent: usize) {
        slot(&mut self.mems, child).parent = Some(parent);
        let parent_node = slot(&mut self.mems, parent);
        if !parent_node.children.contains(&child) {
            parent_node.children.push(child);
        }
    }

    pub fn parent_of(&self, mem: usize) -> Option<usize> {
        get(&self.mems, mem).and_then(|n| n.parent)
    }

    pub fn live_children(&self, mem: usize) -> &[usize] {
        get(&self.mems, mem)
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
    }

    /// Drops a dead memory object from the graph, detaching it from its parent. Returns the
    /// parent so the caller can re-check it.
    pub fn remove_mem(&mut self, mem: usize) -> Option<usize> {
        let node = self.mems.get_mut(mem).and_then(Option::take)?;
        if let Some(parent) = node.parent {
            if let Some(Some(p)) = self.mems.get_mut(parent) {
                p.children.retain(|&c| c != mem);
            }
        }
        node.parent
    }

    pub fn has_mem(&self, mem: usize) -> bool {
        get(&self.mems, mem).is_some()
    }

    pub fn add_program(&mut self, program: usize) {
        let node = slot(&mut self.programs, program);
        node.link_count += 1;
    }

    /// Adds one reference to `program` and, recursively, to every program it was linked from.
    pub fn retain_program(&mut self, program: usize) {
        let mut stack = vec![program];
        while let Some(p) = stack.pop() {
            let node = slot(&mut self.programs, p);
            node.link_count += 1;
            stack.extend(node.linked_inputs.iter().copied());
        }
    }

    /// Records the inputs of a compile/link and takes a reference on each of them.
    pub fn link_program(&mut self, program: usize, inputs: &[usize]) {
        slot(&mut self.programs, program).linked_inputs = inputs.to_vec();
        for &input in inputs {
            self.retain_program(input);
        }
    }

    pub fn link_count(&self, program: usize) -> u32 {
        get(&self.programs, program)
            .map(|n| n.link_count)
            .unwrap_or(0)
    }

    pub fn has_program(&self, program: usize) -> bool {
        get(&self.programs, program).is_some()
    }

    pub fn linked_inputs(&self, program: usize) -> &[usize] {
        get(&self.programs, program)
            .map(|n| n.linked_inputs.as_slice())
            .unwrap_or(&[])
    }

    /// Drops one reference from `program` and its linked inputs. Programs whose count reaches
    /// zero are removed once none of their kernels are alive.
    pub fn release_program(&mut self, program: usize) -> ProgramRelease {
        let mut release = ProgramRelease::default();
        let mut stack = vec![program];
        while let Some(p) = stack.pop() {
            let Some(Some(node)) = self.programs.get_mut(p) else {
                continue;
            };
            node.link_count = node.link_count.saturating_sub(1);
            stack.extend(node.linked_inputs.iter().copied());
            let count = node.link_count;
            if count == 0 && !self.has_live_kernels(p) {
                self.programs[p] = None;
                release.dead_programs.push(p);
            }
        }
        release
    }

    fn has_live_kernels(&self, program: usize) -> bool {
        get(&self.programs, program)
            .map(|n| {
                n.kernels
                    .iter()
                    .any(|&k| get(&self.kernels, k).is_some_and(|k| k.live))
            })
            .unwrap_or(false)
    }

    pub fn add_kernel(&mut self, kernel: usize, program: usize) {
        let node = slot(&mut self.kernels, kernel);
        node.program = Some(program);
        node.live = true;
        let program_node = slot(&mut self.programs, program);
        if !program_node.kernels.contains(&kernel) {
            program_node.kernels.push(kernel);
        }
    }

    pub fn program_of(&self, kernel: usize) -> Option<usize> {
        get(&self.kernels, kernel).and_then(|k| k.program)
    }

    pub fn kernels_of(&self, program: usize) -> &[usize] {
        get(&self.programs, program)
            .map(|n| n.kernels.as_slice())
            .unwrap_or(&[])
    }

    /// Marks a kernel as destroyed. If that was the last thing keeping an unreferenced program
    /// around, the program is removed and returned.
    pub fn kill_kernel(&mut self, kernel: usize) -> Option<usize> {
        let node = self.kernels.get_mut(kernel).and_then(Option::as_mut)?;
        node.live = false;
        let program = node.program?;
        let dead = self.has_program(program)
            && self.link_count(program) == 0
            && !self.has_live_kernels(program);
        if dead {
            self.programs[program] = None;
            Some(program)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sub_buffers_detach_from_parent() {
        let mut g = ResourceGraph::new();
        g.add_mem(0);
        g.add_sub_buffer(1, 0);
        g.add_sub_buffer(2, 0);
        assert_eq!(g.parent_of(1), Some(0));
        assert_eq!(g.live_children(0), &[1, 2]);
        assert_eq!(g.remove_mem(1), Some(0));
        assert_eq!(g.live_children(0), &[2]);
        assert!(!g.has_mem(1));
    }

    #[test]
    fn linked_inputs_outlive_the_link_output() {
        let mut g = ResourceGraph::new();
        g.add_program(0);
        g.add_program(1);
        g.add_program(2);
        g.link_program(2, &[0, 1]);
        assert_eq!(g.link_count(0), 2);

        // Releasing an input only drops the application's own reference.
        assert!(g.release_program(0).dead_programs.is_empty());
        assert_eq!(g.link_count(0), 1);

        // Releasing the output releases the link references on its inputs as well.
        let release = g.release_program(2);
        assert_eq!(release.dead_programs, vec![2, 0]);
        assert_eq!(g.link_count(1), 1);
    }

    #[test]
    fn live_kernels_keep_their_program() {
        let mut g = ResourceGraph::new();
        g.add_program(0);
        g.add_kernel(0, 0);
        g.add_kernel(1, 0);
        assert!(g.release_program(0).dead_programs.is_empty());
        assert!(g.has_program(0));
        assert_eq!(g.kill_kernel(0), None);
        assert_eq!(g.kill_kernel(1), Some(0));
        assert!(!g.has_program(0));
    }
}
