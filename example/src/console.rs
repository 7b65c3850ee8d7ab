//! A line-command console in the style of a hobby kernel's shell.

use core::fmt::{self, Write};
use core::ptr::NonNull;
use core::str;
use pool_alloc::{AllocErr, Heap};

/// Size of the line buffer. One byte of it is never used, so at most
/// `MAX_COMMAND_LENGTH - 1` characters can be typed.
pub const MAX_COMMAND_LENGTH: usize = 256;

/// How many live `alloc` buffers the console keeps track of.
pub const SLOTS: usize = 16;

const BANNER: &str = "pool_alloc console v0.1";
const PROMPT: &str = "> ";

/// A decoded key press.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    /// A character key.
    Char(char),
    /// Erase the last character.
    Backspace,
    /// Run the line.
    Enter,
}

/// Where the console's output goes.
pub trait Terminal: Write {
    /// Blank the screen and move the cursor to its top left corner.
    fn clear(&mut self) -> fmt::Result;
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    ptr: NonNull<u8>,
    size: usize,
}

/// The console. It reads keys, echoes them, and runs one command per line.
///
/// The `alloc` and `free` commands allocate from the borrowed heap, and so
/// does nothing else: the console itself needs no dynamic memory.
pub struct Console<'h, T, const N: usize> {
    heap: &'h Heap<N>,
    term: T,
    line: [u8; MAX_COMMAND_LENGTH],
    len: usize,
    slots: [Option<Slot>; SLOTS],
    halted: bool,
}

impl<'h, T: Terminal, const N: usize> Console<'h, T, N> {
    /// Create a console. Nothing is printed until [`Console::boot`].
    pub fn new(heap: &'h Heap<N>, term: T) -> Self {
        Console {
            heap,
            term,
            line: [0; MAX_COMMAND_LENGTH],
            len: 0,
            slots: [None; SLOTS],
            halted: false,
        }
    }

    /// Clear the terminal, and print the banner and the first prompt.
    pub fn boot(&mut self) -> fmt::Result {
        self.clear_screen()?;
        self.term.write_str(PROMPT)
    }

    /// Has the `shutdown` command run?
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// The terminal the console writes to.
    pub fn terminal(&self) -> &T {
        &self.term
    }

    /// Mutable access to the terminal the console writes to.
    pub fn terminal_mut(&mut self) -> &mut T {
        &mut self.term
    }

    /// What has been typed on the current line so far.
    pub fn pending(&self) -> &str {
        // Only ASCII is ever stored.
        str::from_utf8(&self.line[..self.len]).unwrap_or("")
    }

    /// Handle one key press.
    pub fn key(&mut self, key: Key) -> fmt::Result {
        if self.halted {
            return Ok(());
        }

        match key {
            Key::Enter => {
                let line = self.line;
                let len = self.len;
                self.len = 0;

                self.term.write_char('\n')?;
                let command = str::from_utf8(&line[..len]).map_err(|_| fmt::Error)?;
                self.execute(command)?;
                if !self.halted {
                    self.term.write_str(PROMPT)?;
                }
                Ok(())
            }
            Key::Backspace => {
                if self.len > 0 {
                    self.len -= 1;
                    self.term.write_str("\u{8} \u{8}")?;
                }
                Ok(())
            }
            Key::Char(c) => {
                if (c == ' ' || c.is_ascii_graphic()) && self.len < MAX_COMMAND_LENGTH - 1 {
                    self.line[self.len] = c as u8;
                    self.len += 1;
                    self.term.write_char(c)?;
                }
                Ok(())
            }
        }
    }

    /// Type `input`, treating `'\n'` as enter and `'\u{8}'` as backspace.
    pub fn feed(&mut self, input: &str) -> fmt::Result {
        for c in input.chars() {
            let key = match c {
                '\n' | '\r' => Key::Enter,
                '\u{8}' => Key::Backspace,
                c => Key::Char(c),
            };
            self.key(key)?;
        }
        Ok(())
    }

    /// Run one command line.
    pub fn execute(&mut self, line: &str) -> fmt::Result {
        let line = line.trim_start_matches(' ');
        let mut words = line.split_whitespace();
        let command = match words.next() {
            Some(command) => command,
            None => return Ok(()),
        };
        let argument = words.next();

        match command {
            "clear" => self.clear_screen(),
            "help" => self.help(),
            "about" => self.about(),
            "mem" => self.mem(),
            "blocks" => self.blocks(),
            "alloc" => self.alloc(argument),
            "free" => self.free(argument),
            "shutdown" => self.shutdown(),
            _ => {
                writeln!(self.term, "Unknown command: {}", line)?;
                writeln!(self.term, "Type 'help' for available commands")
            }
        }
    }

    fn clear_screen(&mut self) -> fmt::Result {
        self.term.clear()?;
        writeln!(self.term, "{}", BANNER)
    }

    fn help(&mut self) -> fmt::Result {
        let t = &mut self.term;
        writeln!(t, "Available commands:")?;
        writeln!(t, "  clear          - Clear the screen")?;
        writeln!(t, "  help           - Show this help message")?;
        writeln!(t, "  about          - Show system information")?;
        writeln!(t, "  mem            - Show heap usage")?;
        writeln!(t, "  blocks         - List every block in the heap")?;
        writeln!(t, "  alloc <bytes>  - Allocate a buffer into a free slot")?;
        writeln!(t, "  free <slot>    - Release the buffer in a slot")?;
        writeln!(t, "  shutdown       - Halt the system")
    }

    fn about(&mut self) -> fmt::Result {
        writeln!(self.term, "{}", BANNER)?;
        writeln!(
            self.term,
            "A {} byte first-fit heap ({:?} merging)",
            self.heap.capacity().0,
            self.heap.merge_policy()
        )
    }

    fn mem(&mut self) -> fmt::Result {
        let stats = self.heap.stats();
        writeln!(self.term, "capacity:  {} bytes", stats.capacity.0)?;
        writeln!(
            self.term,
            "free:      {} bytes in {} blocks (largest {})",
            stats.free_bytes.0, stats.free_blocks, stats.largest_free_block.0
        )?;
        writeln!(
            self.term,
            "allocated: {} bytes in {} blocks",
            stats.allocated_bytes.0, stats.allocated_blocks
        )
    }

    fn blocks(&mut self) -> fmt::Result {
        writeln!(self.term, "offset   size  state")?;
        for block in self.heap.blocks() {
            writeln!(
                self.term,
                "{:>6} {:>6}  {}",
                block.offset,
                block.size.0,
                if block.allocated { "used" } else { "free" }
            )?;
        }
        Ok(())
    }

    fn alloc(&mut self, argument: Option<&str>) -> fmt::Result {
        let size = match argument.and_then(|a| a.parse::<usize>().ok()) {
            Some(size) => size,
            None => return writeln!(self.term, "Usage: alloc <bytes>"),
        };
        let index = match self.slots.iter().position(Option::is_none) {
            Some(index) => index,
            None => return writeln!(self.term, "Error: all {} slots are in use", SLOTS),
        };

        match self.heap.allocate(size) {
            Ok(ptr) => {
                unsafe { ptr.as_ptr().write_bytes(index as u8, size) };
                self.slots[index] = Some(Slot { ptr, size });
                writeln!(self.term, "slot {}: {} bytes at {:p}", index, size, ptr)
            }
            Err(AllocErr) => writeln!(self.term, "Error: out of memory ({} bytes)", size),
        }
    }

    fn free(&mut self, argument: Option<&str>) -> fmt::Result {
        let index = match argument.and_then(|a| a.parse::<usize>().ok()) {
            Some(index) if index < SLOTS => index,
            _ => return writeln!(self.term, "Usage: free <slot>"),
        };
        let slot = match self.slots[index].take() {
            Some(slot) => slot,
            None => return writeln!(self.term, "Error: slot {} is empty", index),
        };

        match unsafe { self.heap.release(slot.ptr.as_ptr()) } {
            Ok(()) => writeln!(self.term, "slot {}: released {} bytes", index, slot.size),
            Err(e) => writeln!(self.term, "Error: {}", e),
        }
    }

    fn shutdown(&mut self) -> fmt::Result {
        self.halted = true;
        writeln!(self.term, "System halted.")
    }
}
