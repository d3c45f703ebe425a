//! Minimal debug target: exits immediately with a nonzero code.
//!
//! The smallest possible session: create-process, create-thread,
//! exit-thread and exit-process events, nothing else.
//!
//! ```text
//! hindcast --stdout --write-binary quick_exit.hind launch quick_exit.exe
//! ```

fn main()
{
    std::process::exit(7);
}
