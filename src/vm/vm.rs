//! Main Virtual Machine implementation
//!
//! The VM owns the tape, the program, the program counter, the console and
//! network streams and the mode flag that decides which stream `.` and `,`
//! target. Execution is a single fetch/decode/execute loop.
//!
//! Only an unmatched bracket halts execution. Every stream failure is
//! recovered by zeroing the current cell (input, hooks) or by dropping the
//! byte (output), and is reported through the event sink.

use std::io::{Read, Stdin, Stdout, Write};
use std::net::SocketAddr;
use std::time::Duration;

use serde::Serialize;

use crate::events::{Event, EventSink, Silent};
use crate::stream::{port_for_cell, ByteStream, Console, NetState, Network, StreamError};
use crate::vm::errors::VMError;
use crate::vm::program::Program;
use crate::vm::tape::{Direction, Tape};
use crate::vm::types::{Op, StreamMode};

/// Counters reported when a run halts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionStats {
    /// Instructions executed, comments excluded
    pub steps: u64,
    pub bytes_out: u64,
    pub bytes_in: u64,
}

/// Result of a single step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// The program counter moved and execution may continue
    Continue,
    /// The program counter reached the end of the source
    Halted,
}

pub struct VM<R = Stdin, W = Stdout> {
    program: Program,
    tape: Tape,
    pc: usize,
    mode: StreamMode,
    console: Console<R, W>,
    network: Network,
    events: Box<dyn EventSink>,
    stats: ExecutionStats,
}

impl VM<Stdin, Stdout> {
    /// VM wired to the process's stdin and stdout
    pub fn with_stdio(program: Program) -> Result<Self, VMError> {
        Self::new(program, Console::stdio())
    }
}

impl<R: Read, W: Write> VM<R, W> {
    pub fn new(program: Program, console: Console<R, W>) -> Result<Self, VMError> {
        Ok(Self {
            program,
            tape: Tape::new()?,
            pc: 0,
            mode: StreamMode::Console,
            console,
            network: Network::new(),
            events: Box::new(Silent),
            stats: ExecutionStats::default(),
        })
    }

    /// Route diagnostic events to `sink`
    pub fn with_events(mut self, sink: Box<dyn EventSink>) -> Self {
        self.events = sink;
        self
    }

    /// Apply a read/write timeout to network connections opened later
    pub fn with_io_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.network = Network::new().with_io_timeout(timeout);
        self
    }

    pub fn tape(&self) -> &Tape {
        &self.tape
    }

    pub fn pc(&self) -> usize {
        self.pc
    }

    pub fn mode(&self) -> StreamMode {
        self.mode
    }

    pub fn net_state(&self) -> NetState {
        self.network.state()
    }

    pub fn stats(&self) -> ExecutionStats {
        self.stats
    }

    pub fn console(&self) -> &Console<R, W> {
        &self.console
    }

    /// Tear the VM down, handing back the console
    pub fn into_console(mut self) -> Console<R, W> {
        self.shutdown();
        let VM { console, .. } = self;
        console
    }

    fn emit(&mut self, event: Event) {
        self.events.emit(event);
    }

    /// Run until the program counter passes the end of the source.
    ///
    /// Sockets are closed whether the run halts normally or fails.
    pub fn run(&mut self) -> Result<ExecutionStats, VMError> {
        self.emit(Event::debug(
            "vm",
            format!(
                "starting: {} bytes, {} instructions, {:?} dialect",
                self.program.len(),
                self.program.instruction_count(),
                self.program.dialect()
            ),
        ));

        let result = loop {
            match self.step() {
                Ok(Step::Continue) => {}
                Ok(Step::Halted) => break Ok(self.stats),
                Err(e) => break Err(e),
            }
        };

        match &result {
            Ok(stats) => self.emit(Event::info(
                "vm",
                format!(
                    "halted after {} steps ({} bytes out, {} bytes in)",
                    stats.steps, stats.bytes_out, stats.bytes_in
                ),
            )),
            Err(e) => {
                self.emit(Event::error("vm", format!("fatal at pc {}: {}", self.pc, e)));
                let snapshot = self.tape.to_string();
                self.emit(Event::debug("tape", snapshot));
            }
        }

        self.shutdown();
        result
    }

    /// Fetch, decode and execute the symbol at the program counter
    pub fn step(&mut self) -> Result<Step, VMError> {
        if self.pc >= self.program.len() {
            return Ok(Step::Halted);
        }

        if let Some(op) = self.program.op_at(self.pc) {
            self.stats.steps += 1;
            self.execute(op)?;
        }
        self.pc += 1;

        if self.pc >= self.program.len() {
            Ok(Step::Halted)
        } else {
            Ok(Step::Continue)
        }
    }

    fn execute(&mut self, op: Op) -> Result<(), VMError> {
        match op {
            Op::Right => self.shift(Direction::Right),
            Op::Left => self.shift(Direction::Left),
            Op::Inc => self.tape.increment(),
            Op::Dec => self.tape.decrement(),
            Op::Output => self.output(),
            Op::Input => self.input(),
            Op::LoopOpen => {
                if self.tape.read() == 0 {
                    // Land on the matching `]`; the increment after this
                    // step moves past it.
                    self.pc = self.program.matching_close(self.pc)?;
                }
            }
            Op::LoopClose => {
                if self.tape.read() != 0 {
                    // Land on the matching `[`; execution resumes at the
                    // first instruction of the body.
                    self.pc = self.program.matching_open(self.pc)?;
                }
            }
            Op::ServerHook => self.server_hook(),
            Op::ClientHook => self.client_hook(),
            Op::ToggleStream => {
                self.mode = self.mode.toggled();
                let msg = format!("stream mode: {}", self.mode);
                self.emit(Event::debug("stream", msg));
            }
            Op::Peek => self.peek(),
        }
        Ok(())
    }

    fn shift(&mut self, direction: Direction) {
        if !self.tape.shift(direction) {
            let msg = format!(
                "cursor clamped at cell {} moving {:?}",
                self.tape.cursor(),
                direction
            );
            self.emit(Event::debug("tape", msg));
        }
    }

    fn output(&mut self) {
        let byte = self.tape.read();

        let sent = match self.mode {
            StreamMode::Network if self.network.is_connected() => self.network.put(byte),
            StreamMode::Network => {
                self.emit(Event::network("stream", "no peer connected, writing to console"));
                self.console.put(byte)
            }
            StreamMode::Console => self.console.put(byte),
        };

        match sent {
            Ok(()) => self.stats.bytes_out += 1,
            Err(e) => self.emit(Event::error("stream", format!("output failed: {}", e))),
        }
    }

    fn input(&mut self) {
        let received = match self.mode {
            StreamMode::Console => self.console.get(),
            StreamMode::Network => self.network.get(),
        };

        let value = match received {
            Ok(Some(byte)) => {
                self.stats.bytes_in += 1;
                byte
            }
            Ok(None) => {
                let msg = format!("{} input ended", self.mode);
                self.emit(Event::debug("stream", msg));
                0
            }
            Err(StreamError::NotConnected) => {
                self.emit(Event::network("stream", "input with no peer connected"));
                0
            }
            Err(e) => {
                self.emit(Event::error("stream", format!("input failed: {}", e)));
                0
            }
        };
        self.tape.write(value);
    }

    fn peek(&mut self) {
        let value = match self.network.peek() {
            Ok(byte) => byte.unwrap_or(0),
            Err(StreamError::NotConnected) => 0,
            Err(e) => {
                self.emit(Event::error("socket", format!("peek failed: {}", e)));
                0
            }
        };
        self.tape.write(value);
    }

    fn server_hook(&mut self) {
        let port = port_for_cell(self.tape.read());

        if self.network.is_open() {
            self.emit(Event::network(
                "socket",
                "replacing existing connection with a new listener",
            ));
        }

        let events = &mut self.events;
        let opened = self.network.open_server(port, |local| {
            events.emit(Event::network("socket", format!("listening on {}", local)));
        });
        self.finish_hook(opened);
    }

    fn client_hook(&mut self) {
        let port = port_for_cell(self.tape.read());

        if self.network.is_open() {
            self.emit(Event::network(
                "socket",
                "replacing existing connection with a new outbound one",
            ));
        }

        let msg = format!("connecting to 127.0.0.1:{}", port);
        self.emit(Event::network("socket", msg));
        let opened = self.network.open_client(port);
        self.finish_hook(opened);
    }

    fn finish_hook(&mut self, opened: Result<SocketAddr, StreamError>) {
        match opened {
            Ok(peer) => {
                let msg = format!("connected to {}", peer);
                self.emit(Event::network("socket", msg));
            }
            Err(e) => {
                self.emit(Event::error("socket", e.to_string()));
                self.tape.write(0);
            }
        }
    }

    fn shutdown(&mut self) {
        if self.network.close() {
            self.emit(Event::network("socket", "connection closed"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{Level, Recorder};
    use crate::vm::types::Dialect;
    use std::cell::RefCell;
    use std::io::{self, Cursor};
    use std::net::TcpListener;
    use std::rc::Rc;

    /// Sink shared between a test and the VM that owns it
    #[derive(Clone, Default)]
    struct SharedRecorder(Rc<RefCell<Recorder>>);

    impl EventSink for SharedRecorder {
        fn emit(&mut self, event: Event) {
            self.0.borrow_mut().emit(event);
        }
    }

    fn run_with_input(src: &str, input: &[u8]) -> (Result<ExecutionStats, VMError>, Vec<u8>) {
        let program = Program::new(src, Dialect::Extended);
        let console = Console::new(Cursor::new(input.to_vec()), Vec::new());
        let mut vm = VM::new(program, console).unwrap();
        let result = vm.run();
        let (_, out) = vm.into_console().into_parts();
        (result, out)
    }

    fn run(src: &str) -> (Result<ExecutionStats, VMError>, Vec<u8>) {
        run_with_input(src, b"")
    }

    #[test]
    fn test_multiplication_loop_output() {
        // 8 * 8 + 1 = 65
        let (result, out) = run("++++++++[>++++++++<-]>+.");
        assert!(result.is_ok());
        assert_eq!(out, b"A");

        // 4 * 8 + 1 = 33
        let (result, out) = run("++++[>++++++++<-]>+.");
        assert!(result.is_ok());
        assert_eq!(out, b"!");
    }

    #[test]
    fn test_plus_count_mod_256() {
        for n in [0usize, 1, 65, 255, 256, 300] {
            let src = format!("{}.", "+".repeat(n));
            let (_, out) = run(&src);
            assert_eq!(out, vec![(n % 256) as u8]);
        }
    }

    #[test]
    fn test_decrement_wraps_below_zero() {
        let (_, out) = run("-.");
        assert_eq!(out, vec![255]);
    }

    #[test]
    fn test_unmatched_open_is_fatal_before_output() {
        let (result, out) = run("[.");
        assert_eq!(
            result.unwrap_err(),
            VMError::UnmatchedBracket {
                offset: 0,
                symbol: '['
            }
        );
        assert!(out.is_empty());
    }

    #[test]
    fn test_unmatched_close_is_fatal_only_when_taken() {
        let (result, _) = run("]");
        assert!(result.is_ok());

        let (result, out) = run("+.]+.");
        assert!(matches!(
            result,
            Err(VMError::UnmatchedBracket { offset: 2, symbol: ']' })
        ));
        assert_eq!(out, vec![1]);
    }

    #[test]
    fn test_unbalanced_open_with_nonzero_cell_falls_through() {
        let (result, out) = run("+[.");
        assert!(result.is_ok());
        assert_eq!(out, vec![1]);
    }

    #[test]
    fn test_zero_cell_skips_loop_body() {
        let (result, out) = run("[+.]+.");
        assert!(result.is_ok());
        assert_eq!(out, vec![1]);
    }

    #[test]
    fn test_nested_loops() {
        // 3 * 4 * 5 = 60
        let (_, out) = run("+++[>++++[>+++++<-]<-]>>.");
        assert_eq!(out, vec![60]);
    }

    #[test]
    fn test_left_at_origin_is_clamped() {
        let (result, out) = run("<<<+.");
        assert!(result.is_ok());
        assert_eq!(out, vec![1]);
    }

    #[test]
    fn test_right_edge_is_clamped() {
        let src = format!("{}+.", ">".repeat(crate::vm::tape::TAPE_SIZE + 5));
        let program = Program::new(src, Dialect::Classic);
        let console = Console::new(io::empty(), Vec::new());
        let mut vm = VM::new(program, console).unwrap();
        vm.run().unwrap();
        assert_eq!(vm.tape().cursor(), crate::vm::tape::TAPE_SIZE - 1);
        assert_eq!(vm.console().writer(), &vec![1u8]);
    }

    #[test]
    fn test_console_input_and_eof() {
        let (result, out) = run_with_input(",.,.,.", b"ab");
        assert_eq!(out, vec![b'a', b'b', 0]);
        let stats = result.unwrap();
        assert_eq!(stats.bytes_in, 2);
        assert_eq!(stats.bytes_out, 3);
    }

    #[test]
    fn test_comments_are_ignored() {
        let (result, out) = run("hello + world + .");
        assert_eq!(out, vec![2]);
        assert_eq!(result.unwrap().steps, 3);
    }

    #[test]
    fn test_empty_program_halts() {
        let (result, out) = run("");
        assert_eq!(result.unwrap(), ExecutionStats::default());
        assert!(out.is_empty());
    }

    #[test]
    fn test_toggle_changes_mode_only() {
        let program = Program::new("%", Dialect::Extended);
        let mut vm = VM::new(program, Console::new(io::empty(), Vec::new())).unwrap();
        vm.step().unwrap();
        assert_eq!(vm.mode(), StreamMode::Network);
        assert_eq!(vm.net_state(), NetState::Unopened);
    }

    #[test]
    fn test_network_mode_without_peer() {
        let recorder = SharedRecorder::default();
        let program = Program::new("+++++%.+,.", Dialect::Extended);
        let console = Console::new(Cursor::new(b"x".to_vec()), Vec::new());
        let mut vm = VM::new(program, console)
            .unwrap()
            .with_events(Box::new(recorder.clone()));
        vm.run().unwrap();

        // output falls back to the console, input yields 0 without reading stdin
        assert_eq!(vm.console().writer(), &vec![5u8, 0u8]);
        let rec = recorder.0.borrow();
        assert_eq!(
            rec.messages(Level::Network)
                .iter()
                .filter(|m| m.contains("writing to console"))
                .count(),
            2
        );
        assert!(rec
            .messages(Level::Network)
            .contains(&"input with no peer connected"));
    }

    #[test]
    fn test_peek_without_peer_zeroes_cell() {
        let program = Program::new("+++!.", Dialect::Extended);
        let console = Console::new(io::empty(), Vec::new());
        let mut vm = VM::new(program, console).unwrap();
        vm.run().unwrap();
        assert_eq!(vm.console().writer(), &vec![0u8]);
    }

    #[test]
    fn test_classic_dialect_ignores_network_symbols() {
        let program = Program::new("+++!%.", Dialect::Classic);
        let console = Console::new(io::empty(), Vec::new());
        let mut vm = VM::new(program, console).unwrap();
        let stats = vm.run().unwrap();
        assert_eq!(vm.console().writer(), &vec![3u8]);
        assert_eq!(vm.mode(), StreamMode::Console);
        assert_eq!(stats.steps, 4);
    }

    #[test]
    fn test_client_hook_failure_zeroes_cell() {
        // a cell whose port was just free, so the connect is refused
        let cell = (200..=255u8)
            .find(|&c| TcpListener::bind(("127.0.0.1", port_for_cell(c))).is_ok())
            .unwrap();
        let recorder = SharedRecorder::default();
        let src = format!("{}&.", "+".repeat(cell as usize));
        let program = Program::new(src, Dialect::Extended);
        let mut vm = VM::new(program, Console::new(io::empty(), Vec::new()))
            .unwrap()
            .with_events(Box::new(recorder.clone()));
        vm.run().unwrap();
        assert_eq!(vm.console().writer(), &vec![0u8]);
        assert!(!recorder.0.borrow().messages(Level::Error).is_empty());
    }

    #[test]
    fn test_run_reports_fatal_event() {
        let recorder = SharedRecorder::default();
        let program = Program::new("[", Dialect::Extended);
        let mut vm = VM::new(program, Console::new(io::empty(), Vec::new()))
            .unwrap()
            .with_events(Box::new(recorder.clone()));
        assert!(vm.run().is_err());
        let rec = recorder.0.borrow();
        assert_eq!(rec.messages(Level::Error).len(), 1);
        assert!(rec.messages(Level::Error)[0].contains("Unmatched '['"));
    }
}
