use core::fmt;
use core::mem::size_of;

use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::diagnostic::log_debug;
use crate::error::{Error, Result};
use crate::ledger::{Allocation, Ledger};
use crate::platform::{AllocFlags, HostAllocator};

pub const MH_MAGIC: u32 = 0xfeed_face;
pub const MH_CIGAM: u32 = 0xcefa_edfe;
pub const MH_MAGIC_64: u32 = 0xfeed_facf;
pub const MH_CIGAM_64: u32 = 0xcffa_edfe;

pub const LC_UUID: u32 = 0x1b;

/// Canonical text form plus the NUL terminator.
pub const UUID_STRING_LEN: usize = 37;

#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct MachHeader {
    pub magic: u32,
    pub cputype: i32,
    pub cpusubtype: i32,
    pub filetype: u32,
    pub ncmds: u32,
    pub sizeofcmds: u32,
    pub flags: u32,
}

#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct MachHeader64 {
    pub magic: u32,
    pub cputype: i32,
    pub cpusubtype: i32,
    pub filetype: u32,
    pub ncmds: u32,
    pub sizeofcmds: u32,
    pub flags: u32,
    pub reserved: u32,
}

#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct LoadCommand {
    pub cmd: u32,
    pub cmdsize: u32,
}

#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct UuidCommand {
    pub cmd: u32,
    pub cmdsize: u32,
    pub uuid: [u8; 16],
}

/// A raw 16-byte image identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Uuid(pub [u8; 16]);

impl Uuid {
    /// Write `xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx` plus NUL into `out`.
    pub fn format_into(&self, out: &mut [u8; UUID_STRING_LEN]) {
        const HEX: &[u8; 16] = b"0123456789abcdef";

        let mut i = 0;
        for (n, byte) in self.0.iter().enumerate() {
            if matches!(n, 4 | 6 | 8 | 10) {
                out[i] = b'-';
                i += 1;
            }
            out[i] = HEX[(byte >> 4) as usize];
            out[i + 1] = HEX[(byte & 0xF) as usize];
            i += 2;
        }
        out[i] = 0;
    }
}

impl fmt::Display for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut buf = [0u8; UUID_STRING_LEN];
        self.format_into(&mut buf);
        // Only ASCII hex digits and dashes were written.
        f.write_str(core::str::from_utf8(&buf[..UUID_STRING_LEN - 1]).map_err(|_| fmt::Error)?)
    }
}

/// Header facts the walk needs, already in native byte order.
struct Header {
    len: usize,
    swapped: bool,
    ncmds: u32,
}

fn native(swapped: bool, v: u32) -> u32 {
    if swapped { v.swap_bytes() } else { v }
}

/// Header size and byte order for a magic, or `None` if it is not Mach-O.
fn classify(magic: u32) -> Option<(usize, bool)> {
    match magic {
        MH_MAGIC => Some((size_of::<MachHeader>(), false)),
        MH_CIGAM => Some((size_of::<MachHeader>(), true)),
        MH_MAGIC_64 => Some((size_of::<MachHeader64>(), false)),
        MH_CIGAM_64 => Some((size_of::<MachHeader64>(), true)),
        _ => None,
    }
}

fn parse_header(image: &[u8]) -> Result<Header> {
    let magic = u32::read_from_prefix(image).ok_or(Error::BadImage)?;
    let (len, swapped) = classify(magic).ok_or(Error::BadImage)?;
    if image.len() < len {
        return Err(Error::BadImage);
    }
    // The 64-bit header only appends a reserved word.
    let h = MachHeader::read_from_prefix(image).ok_or(Error::BadImage)?;
    Ok(Header {
        len,
        swapped,
        ncmds: native(swapped, h.ncmds),
    })
}

/// Find the `LC_UUID` of the image held in `image`.
pub fn image_uuid(image: &[u8]) -> Result<Uuid> {
    let header = parse_header(image)?;

    let mut off = header.len;
    for _ in 0..header.ncmds {
        let rest = image.get(off..).ok_or(Error::NoUuid)?;
        let Some(lc) = LoadCommand::read_from_prefix(rest) else {
            log_debug!("macho: load command at {:#x} runs past the image", off);
            return Err(Error::NoUuid);
        };

        if native(header.swapped, lc.cmd) == LC_UUID {
            let uc = UuidCommand::read_from_prefix(rest).ok_or(Error::NoUuid)?;
            return Ok(Uuid(uc.uuid));
        }

        let size = native(header.swapped, lc.cmdsize) as usize;
        if size < size_of::<LoadCommand>() {
            log_debug!("macho: load command at {:#x} has bad size {}", off, size);
            return Err(Error::NoUuid);
        }
        off = off.checked_add(size).ok_or(Error::NoUuid)?;
    }
    Err(Error::NoUuid)
}

/// View the image starting at `base`, sized by its own header.
///
/// Only the magic is read when it does not match.
///
/// # Safety
/// If `base` starts with a Mach-O magic it must point at a complete header
/// followed by `sizeofcmds` readable bytes that stay valid for `'a`.
pub unsafe fn image_at<'a>(base: *const u8) -> Result<&'a [u8]> {
    assert!(!base.is_null(), "image_at: null image address");

    // SAFETY: every image starts with at least a 4-byte magic.
    let magic = unsafe { base.cast::<u32>().read_unaligned() };
    let (header_len, swapped) = classify(magic).ok_or(Error::BadImage)?;

    // SAFETY: a recognized magic promises a full header.
    let h = unsafe { base.cast::<MachHeader>().read_unaligned() };
    let len = header_len + native(swapped, h.sizeofcmds) as usize;
    // SAFETY: caller guarantees header + sizeofcmds readable bytes.
    Ok(unsafe { core::slice::from_raw_parts(base, len) })
}

/// Write the UUID string of the image at `base` into `out`.
///
/// # Safety
/// Same contract as [`image_at`].
pub unsafe fn image_uuid_string(base: *const u8, out: &mut [u8; UUID_STRING_LEN]) -> Result<()> {
    // SAFETY: forwarded from the caller.
    let image = unsafe { image_at(base) }?;
    image_uuid(image)?.format_into(out);
    Ok(())
}

/// Format the UUID of the image at `base` into a new ledger allocation.
///
/// The returned 37-byte block holds the NUL-terminated canonical string.
/// Returns `None` for a non-Mach-O image, a missing `LC_UUID`, or an
/// exhausted allocator.
///
/// # Safety
/// Same contract as [`image_at`].
pub unsafe fn find_identifier<H: HostAllocator>(
    ledger: &Ledger<H>,
    base: *const u8,
) -> Option<Allocation<'_, H>> {
    // SAFETY: forwarded from the caller.
    let image = unsafe { image_at(base) }.ok()?;
    let uuid = image_uuid(image).ok()?;

    let mut buf = ledger.allocate_zeroed(UUID_STRING_LEN, AllocFlags::NOWAIT)?;
    let out: &mut [u8; UUID_STRING_LEN] = buf.as_mut_slice().try_into().ok()?;
    uuid.format_into(out);
    Some(buf)
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;
    use crate::testing::CountingHost;
    use std::string::ToString;
    use std::vec::Vec;

    const SAMPLE: [u8; 16] = [
        0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xAA, 0xBB, 0xCC, 0xDD, 0xEE,
        0xFF,
    ];
    const SAMPLE_STR: &str = "00112233-4455-6677-8899-aabbccddeeff";

    /// Build a 64-bit image from `(cmd, payload_len)` pairs, putting
    /// `SAMPLE` in every `LC_UUID`.
    fn image64(cmds: &[(u32, usize)], swap: bool) -> Vec<u8> {
        let w = |v: u32| if swap { v.swap_bytes() } else { v };

        let mut body = Vec::new();
        for &(cmd, payload) in cmds {
            if cmd == LC_UUID {
                let uc = UuidCommand {
                    cmd: w(LC_UUID),
                    cmdsize: w(size_of::<UuidCommand>() as u32),
                    uuid: SAMPLE,
                };
                body.extend_from_slice(uc.as_bytes());
            } else {
                let lc = LoadCommand {
                    cmd: w(cmd),
                    cmdsize: w((size_of::<LoadCommand>() + payload) as u32),
                };
                body.extend_from_slice(lc.as_bytes());
                body.resize(body.len() + payload, 0xEE);
            }
        }

        let header = MachHeader64 {
            magic: w(MH_MAGIC_64),
            cputype: 0x0100_0007,
            filetype: w(0xb),
            ncmds: w(cmds.len() as u32),
            sizeofcmds: w(body.len() as u32),
            ..Default::default()
        };
        let mut image = header.as_bytes().to_vec();
        image.extend_from_slice(&body);
        image
    }

    #[test]
    fn finds_uuid_in_second_command() {
        let image = image64(&[(0x19, 64), (LC_UUID, 0), (0x2, 16)], false);
        let uuid = image_uuid(&image).unwrap();
        assert_eq!(uuid, Uuid(SAMPLE));
        assert_eq!(uuid.to_string(), SAMPLE_STR);
    }

    #[test]
    fn missing_uuid_is_absent() {
        let image = image64(&[(0x19, 64), (0x2, 16)], false);
        assert_eq!(image_uuid(&image), Err(Error::NoUuid));
    }

    #[test]
    fn unknown_magic_is_absent() {
        let image = [0xde, 0xad, 0xbe, 0xef, 0, 0, 0, 0];
        assert_eq!(image_uuid(&image), Err(Error::BadImage));
        assert_eq!(unsafe { image_at(image.as_ptr()) }, Err(Error::BadImage));
    }

    #[test]
    fn byte_swapped_image() {
        let image = image64(&[(0x19, 8), (LC_UUID, 0)], true);
        assert_eq!(image_uuid(&image).unwrap().to_string(), SAMPLE_STR);
    }

    #[test]
    fn thirty_two_bit_image() {
        let uc = UuidCommand {
            cmd: LC_UUID,
            cmdsize: size_of::<UuidCommand>() as u32,
            uuid: SAMPLE,
        };
        let header = MachHeader {
            magic: MH_MAGIC,
            ncmds: 1,
            sizeofcmds: size_of::<UuidCommand>() as u32,
            ..Default::default()
        };
        let mut image = header.as_bytes().to_vec();
        image.extend_from_slice(uc.as_bytes());
        assert_eq!(image_uuid(&image).unwrap(), Uuid(SAMPLE));
    }

    #[test]
    fn oversized_command_stops_scan() {
        let mut image = image64(&[(0x19, 8), (LC_UUID, 0)], false);
        // Point the first command's size far past the end.
        let at = size_of::<MachHeader64>() + 4;
        image[at..at + 4].copy_from_slice(&0x1000u32.to_ne_bytes());
        assert_eq!(image_uuid(&image), Err(Error::NoUuid));
    }

    #[test]
    fn zero_sized_command_stops_scan() {
        let mut image = image64(&[(0x19, 8), (LC_UUID, 0)], false);
        let at = size_of::<MachHeader64>() + 4;
        image[at..at + 4].copy_from_slice(&0u32.to_ne_bytes());
        assert_eq!(image_uuid(&image), Err(Error::NoUuid));
    }

    #[test]
    fn truncated_uuid_payload_is_absent() {
        let mut image = image64(&[(LC_UUID, 0)], false);
        image.truncate(image.len() - 4);
        assert_eq!(image_uuid(&image), Err(Error::NoUuid));
    }

    #[test]
    fn format_into_terminates() {
        let mut out = [0xFFu8; UUID_STRING_LEN];
        Uuid(SAMPLE).format_into(&mut out);
        assert_eq!(&out[..36], SAMPLE_STR.as_bytes());
        assert_eq!(out[36], 0);
    }

    #[test]
    fn find_identifier_allocates_through_ledger() {
        let ledger = Ledger::new(CountingHost::new());
        let image = image64(&[(0x19, 64), (LC_UUID, 0), (0x2, 16)], false);

        let s = unsafe { find_identifier(&ledger, image.as_ptr()) }.unwrap();
        assert_eq!(s.len(), UUID_STRING_LEN);
        assert_eq!(&s.as_slice()[..36], SAMPLE_STR.as_bytes());
        assert_eq!(s.as_slice()[36], 0);
        assert_eq!(ledger.outstanding(), 1);

        drop(s);
        ledger.assert_balanced();
    }

    #[test]
    fn find_identifier_without_uuid_allocates_nothing() {
        let ledger = Ledger::new(CountingHost::new());
        let image = image64(&[(0x19, 64)], false);
        assert!(unsafe { find_identifier(&ledger, image.as_ptr()) }.is_none());
        assert_eq!(ledger.host().allocs(), 0);
    }

    #[test]
    fn find_identifier_on_exhausted_host() {
        let ledger = Ledger::new(CountingHost::new());
        ledger.host().exhaust(true);
        let image = image64(&[(LC_UUID, 0)], false);
        assert!(unsafe { find_identifier(&ledger, image.as_ptr()) }.is_none());
        assert_eq!(ledger.outstanding(), 0);
    }

    #[test]
    fn image_uuid_string_into_caller_buffer() {
        let image = image64(&[(LC_UUID, 0)], false);
        let mut out = [0u8; UUID_STRING_LEN];
        unsafe { image_uuid_string(image.as_ptr(), &mut out) }.unwrap();
        assert_eq!(&out[..36], SAMPLE_STR.as_bytes());

        let empty = image64(&[], false);
        assert_eq!(
            unsafe { image_uuid_string(empty.as_ptr(), &mut out) },
            Err(Error::NoUuid)
        );
    }

    #[test]
    #[should_panic(expected = "null image address")]
    fn null_base_is_fatal() {
        let _ = unsafe { image_at(core::ptr::null()) };
    }
}
