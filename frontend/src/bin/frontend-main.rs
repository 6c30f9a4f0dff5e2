use std::error::Error;
use std::fs;
use std::process;
use std::thread;
use std::time::{Duration, Instant};

#[macro_use]
extern crate log;

use clap::{App, Arg};

use emu86::config::MachineConfig;
use emu86::cpu::R;
use emu86::machine::Machine;
use emu86::memory::MemoryAddress;
use emu86::string::{parse_number_string, parse_segment_offset};

/// the BIOS keeps a lone IRET here for unused vectors
const IRET_STUB: MemoryAddress = MemoryAddress { segment: 0xF000, offset: 0xFF53 };

fn main() {
    env_logger::init();

    let matches = App::new("emu86-frontend")
        .version("0.1")
        .arg(Arg::with_name("INPUT")
            .help("Flat binary image to run")
            .required(true)
            .index(1))
        .arg(Arg::with_name("CONFIG")
            .help("Machine config in toml format")
            .takes_value(true)
            .long("config"))
        .arg(Arg::with_name("ENTRY")
            .help("SEG:OFF to load the image at and start from (default 085F:0100)")
            .takes_value(true)
            .long("entry"))
        .arg(Arg::with_name("COUNT")
            .help("Stop after this many instructions")
            .takes_value(true)
            .long("count"))
        .arg(Arg::with_name("TIMEOUT")
            .help("Stop after this many seconds")
            .takes_value(true)
            .long("timeout"))
        .arg(Arg::with_name("TRACEFILE")
            .help("Output a instruction trace similar to dosbox LOGS (debugging)")
            .takes_value(true)
            .long("trace"))
        .get_matches();

    if let Err(e) = run(&matches) {
        eprintln!("error: {}", e);
        process::exit(1);
    }
}

fn run(matches: &clap::ArgMatches) -> Result<(), Box<dyn Error>> {
    let mut config = match matches.value_of("CONFIG") {
        Some(path) => MachineConfig::load(path)?,
        None => MachineConfig::default(),
    };
    if let Some(trace) = matches.value_of("TRACEFILE") {
        println!("Instruction trace will be written to {}", trace);
        config.trace = Some(trace.to_owned());
    }

    let (segment, offset) = match matches.value_of("ENTRY") {
        Some(s) => parse_segment_offset(s).ok_or_else(|| format!("invalid entry point {}", s))?,
        None => (0x085F, 0x0100),
    };

    let filename = matches.value_of("INPUT").unwrap_or_default();
    let data = fs::read(filename)?;

    let mut machine = Machine::from_config(&config)?;
    install_iret_stub(&mut machine);
    machine.load_image(&data, segment, offset)?;
    for sr in &[R::DS, R::ES, R::SS] {
        machine.cpu.set_r16(*sr, segment);
    }
    machine.cpu.set_r16(R::SP, 0xFFFE);
    info!("loaded {} ({} bytes) at {:04X}:{:04X}, cpu {}", filename, data.len(), segment, offset, config.cpu);

    if let Some(secs) = matches.value_of("TIMEOUT") {
        let secs = parse_number_string(secs)?;
        let exit = machine.exit_handle();
        thread::spawn(move || {
            thread::sleep(Duration::from_secs(u64::from(secs)));
            exit.request();
        });
    }

    let start = Instant::now();
    let executed = match matches.value_of("COUNT") {
        Some(n) => {
            let n = parse_number_string(n)? as usize;
            machine.execute_instructions(n);
            machine.cpu.instruction_count
        }
        None => machine.run(),
    };
    machine.flush_trace()?;

    let elapsed = start.elapsed();
    println!("executed {} instructions in {:.3}s", executed, elapsed.as_secs_f64());
    if machine.cpu.fatal_error {
        println!("machine stopped on a fatal error");
    }
    print_registers(&machine);
    Ok(())
}

/// points every interrupt vector at an IRET
fn install_iret_stub(machine: &mut Machine) {
    machine.mmu.write_u8(IRET_STUB.value(), 0xCF);
    for v in 0..=255 {
        machine.mmu.write_vec(0, v, IRET_STUB);
    }
}

fn print_registers(machine: &Machine) {
    let r = machine.register_snapshot();
    println!(
        "EAX:{:08X} EBX:{:08X} ECX:{:08X} EDX:{:08X}",
        r.get_r32(R::EAX),
        r.get_r32(R::EBX),
        r.get_r32(R::ECX),
        r.get_r32(R::EDX)
    );
    println!(
        "ESI:{:08X} EDI:{:08X} EBP:{:08X} ESP:{:08X}",
        r.get_r32(R::ESI),
        r.get_r32(R::EDI),
        r.get_r32(R::EBP),
        r.get_r32(R::ESP)
    );
    println!(
        "CS:{:04X} DS:{:04X} ES:{:04X} FS:{:04X} GS:{:04X} SS:{:04X} EIP:{:08X}",
        r.get_r16(R::CS),
        r.get_r16(R::DS),
        r.get_r16(R::ES),
        r.get_r16(R::FS),
        r.get_r16(R::GS),
        r.get_r16(R::SS),
        r.eip
    );
    println!("FLAGS:{:08X} {}", r.flags.u32(), r.flags.trace_str());
}
