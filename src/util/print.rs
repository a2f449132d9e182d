//! Output that never touches the allocator. Anything called from inside an
//! allocation path has to go through here instead of `eprintln!()`.

use libc::{c_void, STDERR_FILENO};

/// The number of decimal digits in `usize::MAX`
pub const MAX_NR_CHARS_USIZE: usize = 20;

/// Write `bytes` to stderr with a raw `write(2)`, retrying short writes.
/// Errors are swallowed, there is nowhere left to report them.
pub fn putstr_err(bytes: &[u8]) {
    let mut rest = bytes;
    while !rest.is_empty() {
        // SAFETY: `rest` is a live slice, valid for `rest.len()` bytes
        let n = unsafe { libc::write(STDERR_FILENO, rest.as_ptr() as *const c_void, rest.len()) };
        if n <= 0 {
            return;
        }
        rest = &rest[n as usize..];
    }
}

/// Render `n` in decimal into the tail of `buf`, returning the written part.
pub fn write_usize(buf: &mut [u8; MAX_NR_CHARS_USIZE], mut n: usize) -> &[u8] {
    let mut i = buf.len();
    loop {
        i -= 1;
        buf[i] = b'0' + (n % 10) as u8;
        n /= 10;
        if n == 0 {
            break;
        }
    }
    &buf[i..]
}

/// Basically just `println!()` but chucks the thread name in front of it!
#[macro_export]
macro_rules! thread_println {
    ($($arg:tt)*) => {
        println!(
            "[{}] {}",
            ::std::thread::current().name().unwrap_or("{unknown}"),
            format_args!($($arg)*)
        )
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_usize_renders_decimal() {
        let mut buf = [0; MAX_NR_CHARS_USIZE];
        assert_eq!(write_usize(&mut buf, 0), b"0");
        assert_eq!(write_usize(&mut buf, 15360), b"15360");
        assert_eq!(
            write_usize(&mut buf, usize::MAX),
            usize::MAX.to_string().as_bytes()
        );
    }
}
