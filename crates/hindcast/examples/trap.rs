//! Debug target that raises one breakpoint trap and exits cleanly.
//!
//! Running it under the debugger produces a first-chance breakpoint event
//! whose innermost stack frame sits on the trap instruction; `--break-breakpoint`
//! stops at it and `--max-instruction` disassembles around it.
//!
//! ```text
//! hindcast --stdout launch --max-instruction 5 trap.exe
//! ```

fn main()
{
    println!("about to hit a breakpoint in process {}", std::process::id());

    #[cfg(target_arch = "x86_64")]
    unsafe {
        std::arch::asm!("int3");
    }
    #[cfg(target_arch = "x86")]
    unsafe {
        std::arch::asm!("int3");
    }

    println!("survived the trap, exiting cleanly");
}
