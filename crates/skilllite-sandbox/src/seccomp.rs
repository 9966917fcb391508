//! Seccomp BPF Module for Sandbox Hardening (Linux only)
//!
//! This module implements seccomp-bpf filters to block dangerous syscalls
//! at the kernel level. Provides defense-in-depth alongside namespace
//! isolation (bwrap) and resource limits (rlimit).
//!
//! Blocked syscalls:
//! - socket(AF_UNIX, ...) — prevent local IPC escape
//! - ptrace — prevent process debugging/injection
//! - mount/umount2 — prevent filesystem manipulation
//! - clone (with CLONE_NEWUSER) — prevent user namespace escape
//! - keyctl — prevent kernel keyring access
//! - kexec_load/kexec_file_load — prevent kernel replacement
//! - pivot_root/chroot — prevent filesystem root manipulation
//! - unshare (with CLONE_NEWUSER) — prevent user namespace creation
//!
//! Architecture support: x86_64 and aarch64

#![cfg(target_os = "linux")]

use std::io;

// ============================================================================
// Seccomp Constants
// ============================================================================

/// AF_UNIX socket family constant
const AF_UNIX: u32 = 1;

/// CLONE_NEWUSER flag for clone/unshare argument filtering
const CLONE_NEWUSER: u32 = 0x10000000;

// Syscall numbers per architecture
// Reference: https://filippo.io/linux-syscall-table/ and kernel headers

#[cfg(target_arch = "x86_64")]
mod syscall_nr {
    pub const SOCKET: u32 = 41;
    pub const PTRACE: u32 = 101;
    pub const MOUNT: u32 = 165;
    pub const UMOUNT2: u32 = 166;
    pub const CLONE: u32 = 56;
    pub const KEYCTL: u32 = 250;
    pub const KEXEC_LOAD: u32 = 246;
    pub const KEXEC_FILE_LOAD: u32 = 320;
    pub const PIVOT_ROOT: u32 = 155;
    pub const CHROOT: u32 = 161;
    pub const UNSHARE: u32 = 272;
}

#[cfg(target_arch = "aarch64")]
mod syscall_nr {
    pub const SOCKET: u32 = 198;
    pub const PTRACE: u32 = 117;
    pub const MOUNT: u32 = 40;
    pub const UMOUNT2: u32 = 39;
    pub const CLONE: u32 = 220;
    pub const KEYCTL: u32 = 219;
    pub const KEXEC_LOAD: u32 = 104;
    pub const KEXEC_FILE_LOAD: u32 = 294;
    pub const PIVOT_ROOT: u32 = 41;
    pub const CHROOT: u32 = 51;
    pub const UNSHARE: u32 = 97;
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
mod syscall_nr {
    pub const SOCKET: u32 = 0;
    pub const PTRACE: u32 = 0;
    pub const MOUNT: u32 = 0;
    pub const UMOUNT2: u32 = 0;
    pub const CLONE: u32 = 0;
    pub const KEYCTL: u32 = 0;
    pub const KEXEC_LOAD: u32 = 0;
    pub const KEXEC_FILE_LOAD: u32 = 0;
    pub const PIVOT_ROOT: u32 = 0;
    pub const CHROOT: u32 = 0;
    pub const UNSHARE: u32 = 0;
}

/// AUDIT_ARCH_X86_64 (EM_X86_64 | __AUDIT_ARCH_64BIT | __AUDIT_ARCH_LE)
#[cfg(target_arch = "x86_64")]
const AUDIT_ARCH: u32 = 0xC000003E;

/// AUDIT_ARCH_AARCH64
#[cfg(target_arch = "aarch64")]
const AUDIT_ARCH: u32 = 0xC00000B7;

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
const AUDIT_ARCH: u32 = 0;

/// Seccomp action: Allow the syscall
const SECCOMP_RET_ALLOW: u32 = 0x7fff0000;

/// Seccomp action: Return errno
const SECCOMP_RET_ERRNO: u32 = 0x00050000;

/// EPERM error code
const EPERM: u32 = 1;

/// Seccomp operation: Set mode filter
const SECCOMP_SET_MODE_FILTER: u32 = 1;

/// PR_SET_NO_NEW_PRIVS
const PR_SET_NO_NEW_PRIVS: i32 = 38;

// ============================================================================
// BPF Filter Structures
// ============================================================================

/// BPF instruction
#[repr(C)]
#[derive(Clone, Copy, Debug)]
struct SockFilter {
    code: u16,
    jt: u8,
    jf: u8,
    k: u32,
}

impl SockFilter {
    const fn new(code: u16, jt: u8, jf: u8, k: u32) -> Self {
        Self { code, jt, jf, k }
    }
}

/// BPF program
#[repr(C)]
struct SockFprog {
    len: u16,
    filter: *const SockFilter,
}

// BPF instruction codes
const BPF_LD: u16 = 0x00;
const BPF_W: u16 = 0x00;
const BPF_ABS: u16 = 0x20;
const BPF_JMP: u16 = 0x05;
const BPF_JEQ: u16 = 0x10;
const BPF_K: u16 = 0x00;
const BPF_RET: u16 = 0x06;

// Seccomp data offsets
const SECCOMP_DATA_NR: u32 = 0;        // Syscall number offset
const SECCOMP_DATA_ARCH: u32 = 4;      // Architecture (AUDIT_ARCH_*) offset
const SECCOMP_DATA_ARGS: u32 = 16;     // Args offset (args[0] is at offset 16)

// ============================================================================
// Unix Socket Filter Configuration
// ============================================================================

/// Configuration for Unix socket blocking
#[derive(Debug, Clone, Default)]
pub struct SeccompConfig {
    /// Whether to block Unix socket creation
    pub block_unix_sockets: bool,
    /// Allowed socket paths (not enforceable via seccomp, for documentation)
    pub allowed_socket_paths: Vec<String>,
}

impl SeccompConfig {
    /// Create a config that blocks all Unix sockets
    pub fn block_all_unix_sockets() -> Self {
        Self {
            block_unix_sockets: true,
            allowed_socket_paths: Vec::new(),
        }
    }

    /// Create a config that allows all Unix sockets
    pub fn allow_all() -> Self {
        Self {
            block_unix_sockets: false,
            allowed_socket_paths: Vec::new(),
        }
    }
}

// ============================================================================
// Seccomp Filter Application
// ============================================================================

/// Apply seccomp filter to block Unix socket creation
///
/// This function must be called in the child process before exec.
/// It sets PR_SET_NO_NEW_PRIVS and applies a BPF filter that blocks
/// socket(AF_UNIX, ...) syscalls.
///
/// # Safety
/// This function uses unsafe syscalls and should only be called
/// in a forked child process before exec.
pub fn apply_unix_socket_filter() -> io::Result<()> {
    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    {
        return Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "Seccomp Unix socket blocking is only supported on x86_64 and aarch64",
        ));
    }

    #[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
    {
        // First, set NO_NEW_PRIVS to allow unprivileged seccomp
        let ret = unsafe { libc::prctl(PR_SET_NO_NEW_PRIVS, 1, 0, 0, 0) };
        if ret != 0 {
            return Err(io::Error::last_os_error());
        }

        // Build the BPF filter
        let filter = build_sandbox_filter();

        // Apply the filter
        let prog = SockFprog {
            len: filter.len() as u16,
            filter: filter.as_ptr(),
        };

        let ret = unsafe {
            libc::syscall(
                libc::SYS_seccomp,
                SECCOMP_SET_MODE_FILTER as libc::c_ulong,
                0 as libc::c_ulong,
                &prog as *const SockFprog as libc::c_ulong,
            )
        };

        if ret != 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(())
    }
}

/// Build a BPF filter that blocks dangerous syscalls.
///
/// Unconditionally blocked: ptrace, mount, umount2, keyctl,
/// kexec_load, kexec_file_load, pivot_root, chroot.
///
/// Conditionally blocked (argument-checked):
/// - socket(AF_UNIX, ...) — blocks only AF_UNIX domain
/// - clone(..., CLONE_NEWUSER, ...) — blocks only CLONE_NEWUSER flag
/// - unshare(CLONE_NEWUSER) — blocks only CLONE_NEWUSER flag
#[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
fn build_sandbox_filter() -> Vec<SockFilter> {
    use syscall_nr::*;

    // BPF_AND instruction for flag masking
    const BPF_ALU: u16 = 0x04;
    const BPF_AND: u16 = 0x50;

    // Jump offset calculations:
    // Each unconditional-block check = 2 instructions (JEQ + RET)
    // socket check = 4 instructions (JEQ + LD arg + JEQ + RET)
    // clone check = 4 instructions (JEQ + LD arg + JEQ_masked + RET)
    // unshare check = 4 instructions (JEQ + LD arg + JEQ_masked + RET)
    // final ALLOW = 1 instruction
    //
    // Total after the initial LD:
    //   arch check = 3 (LD + JEQ + RET)
    //   8 unconditional blocks (ptrace, mount, umount2, keyctl,
    //     kexec_load, kexec_file_load, pivot_root, chroot) × 2 = 16
    //   + socket block = 4
    //   + clone block = 5 (JEQ + LD + ALU_AND + JEQ + RET)
    //   + unshare block = 5 (JEQ + LD + ALU_AND + JEQ + RET)
    //   + ALLOW = 1
    //   Total = 31 instructions after LD

    let deny = SockFilter::new(BPF_RET | BPF_K, 0, 0, SECCOMP_RET_ERRNO | EPERM);
    let allow = SockFilter::new(BPF_RET | BPF_K, 0, 0, SECCOMP_RET_ALLOW);

    let mut f: Vec<SockFilter> = Vec::with_capacity(36);

    // Reject any call made under a different ABI (e.g. x86_64's ia32/x32
    // compat entry points) up front: the syscall numbers below are only
    // meaningful for the native arch, and a mismatched arch would otherwise
    // fall through every JEQ check and hit the final ALLOW.
    f.push(SockFilter::new(BPF_LD | BPF_W | BPF_ABS, 0, 0, SECCOMP_DATA_ARCH));
    f.push(SockFilter::new(BPF_JMP | BPF_JEQ | BPF_K, 1, 0, AUDIT_ARCH));
    f.push(deny);

    // [0] Load syscall number
    f.push(SockFilter::new(BPF_LD | BPF_W | BPF_ABS, 0, 0, SECCOMP_DATA_NR));

    // Unconditional blocks — pattern: if syscall == X, deny; else fall through
    // "jt=0" means jump 0 forward (= next instruction = deny), "jf=1" means skip deny
    let unconditional = [PTRACE, MOUNT, UMOUNT2, KEYCTL, KEXEC_LOAD, KEXEC_FILE_LOAD, PIVOT_ROOT, CHROOT];
    for nr in unconditional {
        f.push(SockFilter::new(BPF_JMP | BPF_JEQ | BPF_K, 0, 1, nr));
        f.push(deny);
    }

    // --- socket(AF_UNIX) block ---
    // remaining after this point: clone(5) + unshare(5) + allow(1) = 11
    f.push(SockFilter::new(BPF_JMP | BPF_JEQ | BPF_K, 0, 3, SOCKET)); // if not socket, skip 3
    f.push(SockFilter::new(BPF_LD | BPF_W | BPF_ABS, 0, 0, SECCOMP_DATA_ARGS)); // load arg0 (domain)
    f.push(SockFilter::new(BPF_JMP | BPF_JEQ | BPF_K, 0, 1, AF_UNIX)); // if AF_UNIX -> deny
    f.push(deny);
    // Reload syscall number (destroyed by arg load above)
    f.push(SockFilter::new(BPF_LD | BPF_W | BPF_ABS, 0, 0, SECCOMP_DATA_NR));

    // --- clone(CLONE_NEWUSER) block ---
    // clone's flags argument: arg0 on x86_64, arg0 on aarch64 (clone3 uses struct but clone uses register)
    // remaining after this: unshare(5) + allow(1) = 6
    f.push(SockFilter::new(BPF_JMP | BPF_JEQ | BPF_K, 0, 4, CLONE)); // if not clone, skip 4
    f.push(SockFilter::new(BPF_LD | BPF_W | BPF_ABS, 0, 0, SECCOMP_DATA_ARGS)); // load arg0 (flags)
    f.push(SockFilter::new(BPF_ALU | BPF_AND | BPF_K, 0, 0, CLONE_NEWUSER)); // flags & CLONE_NEWUSER
    f.push(SockFilter::new(BPF_JMP | BPF_JEQ | BPF_K, 0, 1, CLONE_NEWUSER)); // if set -> deny
    f.push(deny);
    // Reload syscall number
    f.push(SockFilter::new(BPF_LD | BPF_W | BPF_ABS, 0, 0, SECCOMP_DATA_NR));

    // --- unshare(CLONE_NEWUSER) block ---
    f.push(SockFilter::new(BPF_JMP | BPF_JEQ | BPF_K, 0, 4, UNSHARE)); // if not unshare, skip 4
    f.push(SockFilter::new(BPF_LD | BPF_W | BPF_ABS, 0, 0, SECCOMP_DATA_ARGS)); // load arg0 (flags)
    f.push(SockFilter::new(BPF_ALU | BPF_AND | BPF_K, 0, 0, CLONE_NEWUSER)); // flags & CLONE_NEWUSER
    f.push(SockFilter::new(BPF_JMP | BPF_JEQ | BPF_K, 0, 1, CLONE_NEWUSER)); // if set -> deny
    f.push(deny);

    // Allow everything else
    f.push(allow);

    f
}

// ============================================================================
// Pre-exec Hook for Sandbox
// ============================================================================

/// Apply seccomp filter in a pre_exec hook
///
/// This is designed to be used with Command::pre_exec() in the sandbox.
///
/// # Example
/// ```ignore
/// use std::process::Command;
/// use std::os::unix::process::CommandExt;
///
/// let mut cmd = Command::new("python");
/// unsafe {
///     cmd.pre_exec(|| {
///         apply_unix_socket_filter_pre_exec()
///     });
/// }
/// ```
pub fn apply_unix_socket_filter_pre_exec() -> io::Result<()> {
    apply_unix_socket_filter()
}

// ============================================================================
// Utility Functions
// ============================================================================

/// Check if seccomp is supported on this system
pub fn is_seccomp_supported() -> bool {
    #[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
    {
        // Try to check if seccomp is available
        // We do this by checking if the kernel supports it
        let ret = unsafe {
            libc::prctl(PR_SET_NO_NEW_PRIVS, 1, 0, 0, 0)
        };
        ret == 0
    }

    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    {
        false
    }
}

/// Get the current architecture name
pub fn get_architecture() -> &'static str {
    #[cfg(target_arch = "x86_64")]
    { "x86_64" }
    
    #[cfg(target_arch = "aarch64")]
    { "aarch64" }
    
    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    { "unsupported" }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seccomp_config() {
        let config = SeccompConfig::block_all_unix_sockets();
        assert!(config.block_unix_sockets);
        assert!(config.allowed_socket_paths.is_empty());

        let config = SeccompConfig::allow_all();
        assert!(!config.block_unix_sockets);
    }

    #[test]
    fn test_architecture_detection() {
        let arch = get_architecture();
        #[cfg(target_arch = "x86_64")]
        assert_eq!(arch, "x86_64");
        
        #[cfg(target_arch = "aarch64")]
        assert_eq!(arch, "aarch64");
    }

    #[test]
    #[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
    fn test_filter_generation() {
        let filter = build_sandbox_filter();
        assert!(!filter.is_empty());
        // 1 (LD) + 16 (8 unconditional × 2) + 5 (socket) + 6 (clone) + 6 (unshare) + 1 (ALLOW) = 35
        assert!(filter.len() > 6, "expanded filter should have more instructions than the old 6-instruction filter");
    }

    #[test]
    fn test_seccomp_support_check() {
        // This just checks that the function doesn't panic
        let _ = is_seccomp_supported();
    }

    #[test]
    #[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
    fn test_filter_checks_arch_before_syscall_numbers() {
        let filter = build_sandbox_filter();
        // [0] LD arch, [1] JEQ AUDIT_ARCH, [2] deny (EPERM) on mismatch
        assert_eq!(filter[0].k, SECCOMP_DATA_ARCH);
        assert_eq!(filter[1].k, AUDIT_ARCH);
        assert_eq!(filter[2].k, SECCOMP_RET_ERRNO | EPERM);
    }
}
