//! The scope stack: variables, slots, and lambda capture discovery.
//!
//! Slots are assigned monotonically per function frame and never reused
//! across lexical blocks (blocks push and pop visibility, not slot numbers),
//! which keeps debug-info slot identity stable. A type's width advances the
//! counter by one or two cells.
//!
//! A frame pushed for a lambda trial is *capture-discovering*: lookups that
//! miss fall through to the enclosing frame, and every hit across the
//! boundary is recorded (in discovery order) as a capture.

use crate::{
    error::{CompileError, Loc},
    registry::Ty,
};

#[derive(Debug, Clone)]
pub struct Variable {
    pub name: Box<str>,
    pub ty: Ty,
    pub slot: u16,
    pub readonly: bool,
}

#[derive(Debug)]
struct Frame {
    /// Visibility scopes; the innermost is last.
    blocks: Vec<Vec<Variable>>,
    next_slot: u16,
    max_slot: u16,
    /// Set for lambda-trial frames: lookups fall through and record captures.
    capture: Option<Vec<Variable>>,
}

impl Frame {
    fn new(capture: bool) -> Self {
        Self {
            blocks: vec![Vec::new()],
            next_slot: 0,
            max_slot: 0,
            capture: capture.then(Vec::new),
        }
    }

    fn find(&self, name: &str) -> Option<&Variable> {
        self.blocks.iter().rev().find_map(|block| {
            block.iter().rev().find(|var| var.name.as_ref() == name)
        })
    }
}

#[derive(Debug, Default)]
pub struct Locals {
    frames: Vec<Frame>,
}

impl Locals {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a function frame. `capture` marks a lambda-trial frame.
    pub fn push_frame(&mut self, capture: bool) {
        self.frames.push(Frame::new(capture));
    }

    /// Closes the top frame, returning (max slots, recorded captures).
    pub fn pop_frame(&mut self) -> (u16, Vec<Variable>) {
        let frame = self.frames.pop().expect("frame stack underflow");
        (frame.max_slot, frame.capture.unwrap_or_default())
    }

    pub fn push_block(&mut self) {
        self.top().blocks.push(Vec::new());
    }

    /// Pops a visibility block; slot numbers are not reclaimed.
    pub fn pop_block(&mut self) {
        let frame = self.top();
        frame.blocks.pop().expect("block stack underflow");
    }

    fn top(&mut self) -> &mut Frame {
        self.frames.last_mut().expect("no open frame")
    }

    /// Declares a variable in the innermost block and assigns its slot.
    pub fn declare(&mut self, name: &str, ty: Ty, readonly: bool, loc: Loc) -> Result<Variable, CompileError> {
        let frame = self.frames.last_mut().expect("no open frame");
        if frame.find(name).is_some() {
            return Err(CompileError::type_error(
                format!("Variable [{name}] is already defined."),
                loc,
            ));
        }
        let slot = frame.next_slot;
        let next = slot.checked_add(ty.size()).ok_or_else(|| {
            CompileError::limit("too many local slots in one function.", loc)
        })?;
        frame.next_slot = next;
        frame.max_slot = frame.max_slot.max(next);
        let var = Variable {
            name: name.into(),
            ty,
            slot,
            readonly,
        };
        frame
            .blocks
            .last_mut()
            .expect("frame always has a block")
            .push(var.clone());
        Ok(var)
    }

    /// Looks a name up, crossing capture-discovering frames.
    ///
    /// A hit in an enclosing frame is recorded as a capture in every crossed
    /// frame and redeclared locally (read-only) so later lookups are stable.
    pub fn lookup(&mut self, name: &str, loc: Loc) -> Result<Variable, CompileError> {
        let top = self.frames.len().checked_sub(1).expect("no open frame");
        if let Some(var) = self.frames[top].find(name) {
            return Ok(var.clone());
        }
        // Fall through capture frames only.
        let mut depth = top;
        while self.frames[depth].capture.is_some() && depth > 0 {
            depth -= 1;
            if let Some(found) = self.frames[depth].find(name) {
                let (ty, found_name) = (found.ty, found.name.clone());
                // Record in each crossed frame and materialize a readonly
                // stand-in at the top so slots resolve during the trial.
                for frame in &mut self.frames[depth + 1..] {
                    if let Some(captures) = &mut frame.capture
                        && !captures.iter().any(|c| c.name == found_name)
                    {
                        captures.push(Variable {
                            name: found_name.clone(),
                            ty,
                            slot: 0,
                            readonly: true,
                        });
                    }
                }
                return self.declare(name, ty, true, loc);
            }
        }
        Err(CompileError::resolution(format!("Variable [{name}] is not defined."), loc))
    }

    /// Current frame's high-water slot count.
    #[must_use]
    pub fn max_slots(&self) -> u16 {
        self.frames.last().map_or(0, |frame| frame.max_slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::catalog::default_registry;

    #[test]
    fn test_wide_types_advance_two_slots() {
        let registry = default_registry().unwrap();
        let core = registry.core();
        let mut locals = Locals::new();
        locals.push_frame(false);
        let a = locals.declare("a", core.int, false, Loc::default()).unwrap();
        let b = locals.declare("b", core.double, false, Loc::default()).unwrap();
        let c = locals.declare("c", core.int, false, Loc::default()).unwrap();
        assert_eq!((a.slot, b.slot, c.slot), (0, 1, 3));
    }

    #[test]
    fn test_block_slots_are_not_reused() {
        let registry = default_registry().unwrap();
        let core = registry.core();
        let mut locals = Locals::new();
        locals.push_frame(false);
        locals.push_block();
        let a = locals.declare("a", core.int, false, Loc::default()).unwrap();
        locals.pop_block();
        locals.push_block();
        let b = locals.declare("b", core.int, false, Loc::default()).unwrap();
        assert_eq!(a.slot, 0);
        assert_eq!(b.slot, 1);
        // `a` is no longer visible after its block closed.
        assert!(locals.lookup("a", Loc::default()).is_err());
    }

    #[test]
    fn test_duplicate_in_scope_rejected() {
        let registry = default_registry().unwrap();
        let core = registry.core();
        let mut locals = Locals::new();
        locals.push_frame(false);
        locals.declare("x", core.int, false, Loc::default()).unwrap();
        let err = locals.declare("x", core.def, false, Loc::default()).unwrap_err();
        assert!(err.message.contains("already defined"));
    }

    #[test]
    fn test_capture_discovery_records_in_order() {
        let registry = default_registry().unwrap();
        let core = registry.core();
        let mut locals = Locals::new();
        locals.push_frame(false);
        locals.declare("a", core.int, false, Loc::default()).unwrap();
        locals.declare("b", core.string, false, Loc::default()).unwrap();
        locals.push_frame(true);
        locals.lookup("b", Loc::default()).unwrap();
        locals.lookup("a", Loc::default()).unwrap();
        // Second lookup of the same name resolves locally, no duplicate.
        locals.lookup("b", Loc::default()).unwrap();
        let (_, captures) = locals.pop_frame();
        let names: Vec<&str> = captures.iter().map(|c| c.name.as_ref()).collect();
        assert_eq!(names, ["b", "a"]);
        assert!(captures.iter().all(|c| c.readonly));
    }

    #[test]
    fn test_regular_frames_do_not_fall_through() {
        let registry = default_registry().unwrap();
        let core = registry.core();
        let mut locals = Locals::new();
        locals.push_frame(false);
        locals.declare("outer", core.int, false, Loc::default()).unwrap();
        locals.push_frame(false);
        assert!(locals.lookup("outer", Loc::default()).is_err());
    }
}
