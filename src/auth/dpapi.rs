//! DPAPI unprotection for the IdentityCRL device ticket
//!
//! The ticket blob stored in the registry is protected with machine-scope
//! DPAPI; any process on the machine can unprotect it. The plaintext is
//! UTF-16LE text.

use crate::error::Result;

/// Decode UTF-16LE bytes into a string, dropping trailing NULs
///
/// An odd trailing byte is ignored; registry blobs occasionally carry one.
pub fn decode_utf16_le(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16_lossy(&units)
        .trim_end_matches('\0')
        .to_string()
}

/// Unprotect a DPAPI blob with `LocalMachine` scope, no UI
#[cfg(windows)]
pub fn unprotect_local_machine(data: &[u8]) -> Result<Vec<u8>> {
    use windows::Win32::Foundation::HLOCAL;
    use windows::Win32::Security::Cryptography::{CryptUnprotectData, CRYPT_INTEGER_BLOB};
    use windows::Win32::System::Memory::LocalFree;

    const CRYPTPROTECT_UI_FORBIDDEN: u32 = 0x1;
    const CRYPTPROTECT_LOCAL_MACHINE: u32 = 0x4;

    let input = CRYPT_INTEGER_BLOB {
        cbData: data.len() as u32,
        pbData: data.as_ptr().cast_mut(),
    };
    let mut output = CRYPT_INTEGER_BLOB::default();

    // SAFETY: input blob points at borrowed bytes that outlive the call;
    // the output buffer is allocated by the API and released via LocalFree
    // after copying.
    unsafe {
        CryptUnprotectData(
            &input,
            None,
            None,
            None,
            None,
            CRYPTPROTECT_UI_FORBIDDEN | CRYPTPROTECT_LOCAL_MACHINE,
            &mut output,
        )?;
        let plaintext =
            std::slice::from_raw_parts(output.pbData, output.cbData as usize).to_vec();
        LocalFree(Some(HLOCAL(output.pbData.cast())));
        Ok(plaintext)
    }
}

#[cfg(not(windows))]
pub fn unprotect_local_machine(_data: &[u8]) -> Result<Vec<u8>> {
    Err(crate::error::ToolkitError::AuthToken(
        "DPAPI is only available on Windows".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_utf16_le() {
        let text = "ztd.dds.microsoft.com";
        let bytes: Vec<u8> = text.encode_utf16().flat_map(u16::to_le_bytes).collect();
        assert_eq!(decode_utf16_le(&bytes), text);
    }

    #[test]
    fn test_decode_strips_trailing_nul() {
        let mut bytes: Vec<u8> = "abc".encode_utf16().flat_map(u16::to_le_bytes).collect();
        bytes.extend_from_slice(&[0, 0]);
        assert_eq!(decode_utf16_le(&bytes), "abc");
    }

    #[test]
    fn test_decode_ignores_odd_tail() {
        let mut bytes: Vec<u8> = "ab".encode_utf16().flat_map(u16::to_le_bytes).collect();
        bytes.push(0x41);
        assert_eq!(decode_utf16_le(&bytes), "ab");
    }
}
