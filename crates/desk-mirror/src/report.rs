//! User-facing failure reporting.
//!
//! Fatal failures are logged, shown in a message box, then panic so the
//! process exits with a non-zero status. The message box matters because the
//! binary usually runs without a console attached.

use tracing::error;

#[cfg(windows)]
use windows::{
    core::{h, HSTRING},
    Win32::UI::WindowsAndMessaging::{MessageBoxW, MB_ICONERROR, MB_OK, MB_SETFOREGROUND},
};

pub fn report_and_panic<Err: core::fmt::Display>(error: Err, message: &str) -> ! {
    error!("{message}: {error}");

    #[cfg(windows)]
    {
        let user_message = format!(
            "ERROR:\n{message}.\nSee the logs for more details, the application will exit."
        );
        unsafe {
            MessageBoxW(
                None,
                &HSTRING::from(user_message),
                h!("Desk Mirror"),
                MB_ICONERROR | MB_OK | MB_SETFOREGROUND,
            )
        };
    }

    panic!("{message}: {error}");
}

pub trait Failure<T> {
    fn report_and_panic(self, message: &str) -> T;
}

impl<T, E: core::fmt::Display> Failure<T> for Result<T, E> {
    fn report_and_panic(self, message: &str) -> T {
        match self {
            Ok(value) => value,
            Err(error) => report_and_panic(error, message),
        }
    }
}
