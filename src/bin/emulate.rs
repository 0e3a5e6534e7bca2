use clap::Parser;
use clap_num::maybe_hex;
use riscvemu::elf_utils::load_elf;
use riscvemu::hart::Hart;
use riscvemu::io::{FlatMemory, HartIo};
use std::io::{Read, Write};
use std::sync::mpsc;
use std::{io, thread};

/// Emulate a 32-bit RISC-V hart against a compiled ELF executable.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about)]
struct Args {
    /// Path to input executable file
    input: String,

    /// Single step through each instruction and print state
    #[arg(short, long)]
    debug: bool,

    /// Break on program counter match and begin debug stepping (use
    /// 0x prefix for hexadecimal)
    #[arg(short, long, value_parser=maybe_hex::<u32>)]
    pc_breakpoint: Option<u32>,

    /// Break on cycle count match and begin debug stepping (use 0x
    /// prefix for hexadecimal)
    #[arg(short, long, value_parser=maybe_hex::<u64>)]
    cycle_breakpoint: Option<u64>,

    /// Print the 8-word memory region starting from this address
    /// along with debugging
    #[arg(short, long, value_parser=maybe_hex::<u32>)]
    memory: Option<u32>,
}

fn press_enter_to_continue() {
    let mut stdin = io::stdin();
    let mut stdout = io::stdout();

    write!(stdout, "Press enter to continue...").unwrap();
    stdout.flush().unwrap();

    // Read a single byte and discard
    let _ = stdin.read(&mut [0u8]).unwrap();
}

fn print_memory(hart: &mut Hart<FlatMemory>, base: u32) {
    for n in 0..8 {
        let addr = base.wrapping_add(4 * n);
        let word = hart.io.mem_read_w(addr).unwrap();
        println!("{addr:x}: {word:x}");
    }
}

fn print_registers(hart: &Hart<FlatMemory>) {
    for n in 0..32 {
        print!("x{n:<2}=0x{:08x}  ", hart.x(n as u8));
        if n % 4 == 3 {
            println!();
        }
    }
    println!("pc=0x{:08x}  cycle={}", hart.pc, hart.cycle());
}

fn run_debug_session(hart: &mut Hart<FlatMemory>, args: &Args) {
    let mut step = false;
    loop {
        if args.debug {
            step = true;
        }
        if let Some(pc_breakpoint) = args.pc_breakpoint {
            if hart.pc == pc_breakpoint {
                step = true;
            }
        }
        if let Some(cycle_breakpoint) = args.cycle_breakpoint {
            if hart.cycle() == cycle_breakpoint {
                step = true;
            }
        }

        if let Err(ex) = hart.step() {
            println!("Got exception {ex} at pc=0x{:x}, cycle={}", hart.pc, hart.cycle());
            return;
        }

        if step {
            print_registers(hart);
            if let Some(base) = args.memory {
                println!("Memory:");
                print_memory(hart, base);
            }
            press_enter_to_continue();
        }
    }
}

fn main() {
    let args = Args::parse();

    if args.debug || args.pc_breakpoint.is_some() || args.cycle_breakpoint.is_some() {
        let mut hart = Hart::<FlatMemory>::default();
        let loaded = load_elf(&mut hart.io, &args.input).unwrap();
        hart.reset(loaded.entry);
        run_debug_session(&mut hart, &args);
    } else {
        let (uart_tx, uart_rx) = mpsc::channel();

        let emulator_handle = thread::spawn(move || {
            let mut hart = Hart::<FlatMemory>::default();
            match load_elf(&mut hart.io, &args.input) {
                Ok(loaded) => hart.reset(loaded.entry),
                Err(e) => {
                    println!("Error loading elf: {e}");
                    return;
                }
            }

            println!("Beginning execution\n");
            loop {
                if let Err(ex) = hart.step() {
                    println!("Got exception {ex} at pc=0x{:x}, cycle={}", hart.pc, hart.cycle());
                    return;
                }
                uart_tx.send(hart.io.flush_stdout()).unwrap();
            }
        });

        let uart_host_handle = thread::spawn(move || loop {
            match uart_rx.recv() {
                Ok(text) => print!("{text}"),
                Err(_) => {
                    println!("UART channel closed");
                    break;
                }
            }
        });

        uart_host_handle.join().unwrap();
        emulator_handle.join().unwrap();
    }
}
