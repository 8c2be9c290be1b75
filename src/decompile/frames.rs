//! Control frames: open conditional branches and switch dispatches.

use crate::insn::Label;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// A forward conditional jump whose target has not been reached yet.
    Branch { target: Label, depth: usize },
    /// A switch dispatch and how many of its distinct labels have been marked.
    Switch {
        default: Label,
        labels: Vec<Label>,
        passed: usize,
    },
}

impl Frame {
    fn is_exhausted_switch(&self) -> bool {
        matches!(self, Frame::Switch { labels, passed, .. } if *passed >= labels.len())
    }
}

/// How control leaves the current instruction without falling through.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Exit {
    Return,
    Goto,
}

#[derive(Clone, Debug, Default)]
pub struct FrameStack {
    frames: Vec<Frame>,
}

impl FrameStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_branch(&mut self, target: Label, depth: usize) {
        self.frames.push(Frame::Branch { target, depth });
    }

    pub fn push_switch(&mut self, default: Label, targets: &[Label]) {
        let mut labels: Vec<Label> = Vec::new();
        for label in targets.iter().chain(std::iter::once(&default)) {
            if !labels.contains(label) {
                labels.push(*label);
            }
        }
        self.frames.push(Frame::Switch {
            default,
            labels,
            passed: 0,
        });
    }

    /// A label was marked. Closes every frame from the outermost branch
    /// targeting it upward and returns the depth that branch recorded.
    pub fn reach(&mut self, label: Label) -> Option<usize> {
        for frame in &mut self.frames {
            if let Frame::Switch { labels, passed, .. } = frame {
                if labels.contains(&label) {
                    *passed += 1;
                }
            }
        }
        let outermost = self
            .frames
            .iter()
            .position(|f| matches!(f, Frame::Branch { target, .. } if *target == label))?;
        let depth = match &self.frames[outermost] {
            Frame::Branch { depth, .. } => *depth,
            Frame::Switch { .. } => 0,
        };
        self.frames.truncate(outermost);
        Some(depth)
    }

    pub fn exit(&mut self, exit: Exit) {
        match self.frames.last() {
            Some(Frame::Branch { .. }) if exit == Exit::Return => {
                self.frames.pop();
            }
            Some(frame) if frame.is_exhausted_switch() => {
                self.frames.pop();
            }
            _ => {}
        }
    }

    /// Frames still open at the end of the method, exhausted switches excluded.
    pub fn unclosed(&self) -> Option<&Frame> {
        self.frames.iter().find(|f| !f.is_exhausted_switch())
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reaching_a_target_closes_nested_frames() {
        let mut frames = FrameStack::new();
        frames.push_branch(Label(1), 0);
        frames.push_branch(Label(2), 1);
        frames.push_branch(Label(1), 1);
        assert_eq!(frames.reach(Label(1)), Some(0));
        assert_eq!(frames.depth(), 0);
        assert_eq!(frames.reach(Label(3)), None);
    }

    #[test]
    fn return_pops_only_branches() {
        let mut frames = FrameStack::new();
        frames.push_switch(Label(9), &[Label(1), Label(2)]);
        frames.push_branch(Label(5), 0);
        frames.exit(Exit::Goto);
        assert_eq!(frames.depth(), 2);
        frames.exit(Exit::Return);
        assert_eq!(frames.depth(), 1);
        frames.exit(Exit::Return);
        assert_eq!(frames.depth(), 1);
        assert!(frames.unclosed().is_some());
    }

    #[test]
    fn switch_closes_after_its_last_label() {
        let mut frames = FrameStack::new();
        frames.push_switch(Label(3), &[Label(1), Label(1), Label(2)]);
        frames.reach(Label(1));
        frames.reach(Label(2));
        frames.exit(Exit::Goto);
        assert_eq!(frames.depth(), 1);
        frames.reach(Label(3));
        assert!(frames.unclosed().is_none());
        frames.exit(Exit::Goto);
        assert_eq!(frames.depth(), 0);
    }
}
