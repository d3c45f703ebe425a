//! The break prompt.
//!
//! When a break flag is set, the event loop stops on the controlling
//! terminal and waits for a single-character decision. The read does not
//! require the terminal to be in a special mode, but a controlling TTY must
//! exist for the prompt to be answerable.

use console::Term;

use crate::error::{HindcastError, HindcastResult};

/// Block until the user picks `c`ontinue or `a`bort.
///
/// Loops on any other key. `a` yields [`HindcastError::UserAbort`], which
/// the caller propagates out of the event loop; in live mode the target is
/// terminated on the way out.
pub fn break_prompt() -> HindcastResult<()>
{
    let terminal = Term::stdout();

    loop {
        let _ = terminal.write_line("[c]ontinue or [a]bort?");
        let choice = terminal
            .read_char()
            .map(|ch| ch.to_ascii_lowercase())
            .unwrap_or('a'); // no TTY to answer on, treat as abort

        match choice {
            'c' => return Ok(()),
            'a' => return Err(HindcastError::UserAbort),
            _ => continue,
        }
    }
}
