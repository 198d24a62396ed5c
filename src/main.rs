//! ocl-emu: run a demo kernel on the simulated OpenCL device.

use std::env;
use std::rc::Rc;

use ocl_emu::device::Device;
use ocl_emu::kernel::Kernel;
use ocl_emu::memory::TypedValue;
use ocl_emu::testing::{programs, EventRecorder};

fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let demo = args
        .iter()
        .skip(1)
        .find(|a| !a.starts_with('-'))
        .map(|s| s.as_str())
        .unwrap_or("copy");
    let trace = args.iter().any(|a| a == "--trace" || a == "-t");

    let mut device = Device::new();
    let recorder = Rc::new(EventRecorder::new());
    device.add_plugin(recorder.clone())?;

    match demo {
        "copy" => run_copy(&mut device)?,
        "atomics" => run_atomics(&mut device)?,
        "barrier" => run_barrier(&mut device)?,
        "constants" => run_constants(&mut device)?,
        other => {
            eprintln!("unknown demo '{}'", other);
            eprintln!("usage: ocl-emu [copy|atomics|barrier|constants] [--trace]");
            std::process::exit(1);
        }
    }

    println!();
    println!("{} plugin events observed", recorder.events().len());
    if trace {
        println!("----------------------------------------");
        for event in recorder.events() {
            println!("{:?}", event);
        }
    }

    Ok(())
}

/// `out[g] = in[g]` over a 1-D range of 8 items in groups of 4.
fn run_copy(device: &mut Device) -> anyhow::Result<()> {
    let module = Rc::new(programs::copy_kernel());
    let mut kernel = Kernel::new(module, "copy")?;

    let n = 8usize;
    let input = device.create_buffer(n * 4)?;
    let output = device.create_buffer(n * 4)?;

    let mut data = Vec::new();
    for i in 0..n as i32 {
        data.extend_from_slice(&(i * i).to_le_bytes());
    }
    device.write_buffer(input, &data)?;

    kernel.set_argument(0, TypedValue::from_size_t(input))?;
    kernel.set_argument(1, TypedValue::from_size_t(output))?;
    device.run(&mut kernel, 1, [0; 3], [n, 1, 1], [4, 1, 1])?;

    println!("copy: out = {:?}", read_ints(device, output, n)?);
    Ok(())
}

/// Sixteen work-items race `atomic_inc` on one counter.
fn run_atomics(device: &mut Device) -> anyhow::Result<()> {
    let module = Rc::new(programs::atomic_counter_kernel());
    let mut kernel = Kernel::new(module, "count")?;

    let n = 16usize;
    let counter = device.create_buffer(4)?;
    let output = device.create_buffer(n * 4)?;

    kernel.set_argument(0, TypedValue::from_size_t(counter))?;
    kernel.set_argument(1, TypedValue::from_size_t(output))?;
    device.run(&mut kernel, 1, [0; 3], [n, 1, 1], [4, 1, 1])?;

    println!("atomics: counter = {:?}", read_ints(device, counter, 1)?[0]);
    println!("atomics: observed = {:?}", read_ints(device, output, n)?);
    Ok(())
}

/// Work-group leader publishes a value through local memory.
fn run_barrier(device: &mut Device) -> anyhow::Result<()> {
    let module = Rc::new(programs::barrier_exchange_kernel());
    let mut kernel = Kernel::new(module, "barrier_exchange")?;

    let n = 8usize;
    let output = device.create_buffer(n * 4)?;
    kernel.set_argument(0, TypedValue::from_size_t(output))?;
    device.run(&mut kernel, 1, [0; 3], [n, 1, 1], [4, 1, 1])?;

    println!("barrier: out = {:?}", read_ints(device, output, n)?);
    Ok(())
}

/// Items read a module-scope constant table.
fn run_constants(device: &mut Device) -> anyhow::Result<()> {
    let module = Rc::new(programs::constant_table_kernel());
    let mut kernel = Kernel::new(module, "lookup")?;

    let n = 4usize;
    let output = device.create_buffer(n * 4)?;
    kernel.set_argument(0, TypedValue::from_size_t(output))?;
    device.run(&mut kernel, 1, [0; 3], [n, 1, 1], [2, 1, 1])?;

    println!("constants: out = {:?}", read_ints(device, output, n)?);
    Ok(())
}

fn read_ints(device: &mut Device, address: usize, count: usize) -> anyhow::Result<Vec<i32>> {
    let bytes = device.read_buffer(address, count * 4)?;
    Ok(bytes
        .chunks_exact(4)
        .map(|c| i32::from_le_bytes(c.try_into().unwrap()))
        .collect())
}
