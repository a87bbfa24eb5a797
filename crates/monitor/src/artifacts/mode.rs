#![forbid(unsafe_code)]

use nix::libc;

/// Render `st_mode` the way `ls -l` does: type char plus three rwx triples
/// with setuid/setgid/sticky folded in.
pub fn symbolic(mode: u32) -> String {
    let kind = match mode & libc::S_IFMT {
        libc::S_IFREG => '-',
        libc::S_IFDIR => 'd',
        libc::S_IFLNK => 'l',
        libc::S_IFBLK => 'b',
        libc::S_IFCHR => 'c',
        libc::S_IFIFO => 'p',
        libc::S_IFSOCK => 's',
        _ => '?',
    };

    let mut out = String::with_capacity(10);
    out.push(kind);
    out.push(if mode & 0o400 != 0 { 'r' } else { '-' });
    out.push(if mode & 0o200 != 0 { 'w' } else { '-' });
    out.push(special(mode & 0o100 != 0, mode & 0o4000 != 0, 's', 'S'));
    out.push(if mode & 0o040 != 0 { 'r' } else { '-' });
    out.push(if mode & 0o020 != 0 { 'w' } else { '-' });
    out.push(special(mode & 0o010 != 0, mode & 0o2000 != 0, 's', 'S'));
    out.push(if mode & 0o004 != 0 { 'r' } else { '-' });
    out.push(if mode & 0o002 != 0 { 'w' } else { '-' });
    out.push(special(mode & 0o001 != 0, mode & 0o1000 != 0, 't', 'T'));
    out
}

fn special(execute: bool, bit: bool, set: char, unset: char) -> char {
    match (execute, bit) {
        (true, true) => set,
        (false, true) => unset,
        (true, false) => 'x',
        (false, false) => '-',
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regular_file_modes() {
        assert_eq!(symbolic(0o100644), "-rw-r--r--");
        assert_eq!(symbolic(0o100755), "-rwxr-xr-x");
    }

    #[test]
    fn directory_and_symlink() {
        assert_eq!(symbolic(0o040755), "drwxr-xr-x");
        assert_eq!(symbolic(0o120777), "lrwxrwxrwx");
    }

    #[test]
    fn special_bits() {
        assert_eq!(symbolic(0o104755), "-rwsr-xr-x");
        assert_eq!(symbolic(0o102755), "-rwxr-sr-x");
        assert_eq!(symbolic(0o101777), "-rwxrwxrwt");
        assert_eq!(symbolic(0o104644), "-rwSr--r--");
    }
}
