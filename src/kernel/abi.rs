//! Legacy ABI layouts
//!
//! Byte-exact structures the invocation core writes into scratch memory when
//! handing a builtin's work off to a real program: segmented pointers, the
//! load-and-execute parameter block and the counted command tail.

use bytemuck::{Pod, Zeroable};

/// Load-and-execute function selector (AX for the program loader)
pub const EXEC_LOAD_AND_RUN: u16 = 0x4b00;

/// Offset of the first default FCB in the program segment prefix
pub const PSP_FCB1_OFFSET: u16 = 0x5c;

/// Offset of the second default FCB in the program segment prefix
pub const PSP_FCB2_OFFSET: u16 = 0x6c;

/// Size of the command tail buffer handed to a launched program
pub const CMDLINE_BUF_SIZE: usize = 256;

/// Size of the load-and-execute parameter block
pub const PARAM_BLOCK_SIZE: usize = std::mem::size_of::<ParamBlock>();

/// Segment:offset pointer, laid out offset first as in memory
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct FarPtr {
    pub offset: u16,
    pub segment: u16,
}

impl FarPtr {
    pub const fn new(segment: u16, offset: u16) -> Self {
        Self { offset, segment }
    }

    /// 20-bit linear address
    pub fn linear(&self) -> u32 {
        ((self.segment as u32) << 4) + self.offset as u32
    }

    /// Same segment, offset advanced by `delta` (wrapping within the segment)
    pub fn add(&self, delta: u16) -> Self {
        Self::new(self.segment, self.offset.wrapping_add(delta))
    }
}

impl std::fmt::Display for FarPtr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04X}:{:04X}", self.segment, self.offset)
    }
}

/// Load-and-execute parameter block
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct ParamBlock {
    /// Environment segment for the child (0 inherits the parent's)
    pub env_segment: u16,
    /// Counted command tail
    pub cmdline: FarPtr,
    pub fcb1: FarPtr,
    pub fcb2: FarPtr,
}

impl ParamBlock {
    /// Parameter block for a child of the program whose PSP is `psp_segment`
    pub fn for_child(psp_segment: u16, cmdline: FarPtr) -> Self {
        Self {
            env_segment: 0,
            cmdline,
            fcb1: FarPtr::new(psp_segment, PSP_FCB1_OFFSET),
            fcb2: FarPtr::new(psp_segment, PSP_FCB2_OFFSET),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        bytes
            .get(..PARAM_BLOCK_SIZE)
            .and_then(|b| bytemuck::try_pod_read_unaligned(b).ok())
    }
}

/// Build the counted command tail a launched program receives
///
/// Layout is `[n] ' ' text '\r'` where `n` counts the leading space and the
/// text. Text that does not fit is cut.
pub fn encode_command_tail(text: &[u8]) -> [u8; CMDLINE_BUF_SIZE] {
    // count byte, leading space and CR leave 253 bytes of text
    let text = &text[..text.len().min(CMDLINE_BUF_SIZE - 3)];
    let mut buf = [0u8; CMDLINE_BUF_SIZE];
    buf[0] = (text.len() + 1) as u8;
    buf[1] = b' ';
    buf[2..2 + text.len()].copy_from_slice(text);
    buf[2 + text.len()] = b'\r';
    buf
}

/// Request handed to the host's program launcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRequest {
    /// Loader function (always [`EXEC_LOAD_AND_RUN`])
    pub function: u16,
    /// Program path, NUL-terminated in scratch memory
    pub program: FarPtr,
    /// Parameter block in scratch memory
    pub param_block: FarPtr,
    /// Decoded program path
    pub program_path: String,
    /// Counted command tail as written to scratch memory (count byte first)
    pub command_tail: Vec<u8>,
}

impl ExecRequest {
    /// Command tail text without the count byte, leading space or CR
    pub fn tail_text(&self) -> String {
        let len = self.command_tail.first().copied().unwrap_or(0) as usize;
        self.command_tail
            .get(2..1 + len)
            .unwrap_or_default()
            .iter()
            .map(|&b| b as char)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_block_layout() {
        assert_eq!(PARAM_BLOCK_SIZE, 14);
        assert_eq!(std::mem::size_of::<FarPtr>(), 4);
    }

    #[test]
    fn test_far_ptr() {
        let ptr = FarPtr::new(0x1234, 0x0010);
        assert_eq!(ptr.linear(), 0x12350);
        assert_eq!(ptr.to_string(), "1234:0010");
        assert_eq!(ptr.add(2), FarPtr::new(0x1234, 0x0012));
        assert_eq!(FarPtr::new(1, 0xffff).add(1), FarPtr::new(1, 0));
    }

    #[test]
    fn test_param_block_for_child() {
        let block = ParamBlock::for_child(0x0800, FarPtr::new(0xc000, 0x40));
        assert_eq!(block.env_segment, 0);
        assert_eq!(block.fcb1, FarPtr::new(0x0800, 0x5c));
        assert_eq!(block.fcb2, FarPtr::new(0x0800, 0x6c));

        let bytes = block.as_bytes().to_vec();
        assert_eq!(bytes.len(), 14);
        assert_eq!(ParamBlock::from_bytes(&bytes), Some(block));
        assert_eq!(ParamBlock::from_bytes(&bytes[..10]), None);
    }

    #[test]
    fn test_encode_command_tail() {
        let buf = encode_command_tail(b"/C DIR");
        assert_eq!(buf[0], 7);
        assert_eq!(&buf[1..9], b" /C DIR\r");
        assert_eq!(buf[9], 0);
    }

    #[test]
    fn test_encode_empty_tail() {
        let buf = encode_command_tail(b"");
        assert_eq!(&buf[..3], &[1, b' ', b'\r']);
    }

    #[test]
    fn test_encode_long_tail_is_cut() {
        let text = vec![b'x'; 400];
        let buf = encode_command_tail(&text);
        assert_eq!(buf[0] as usize, CMDLINE_BUF_SIZE - 2);
        assert_eq!(buf[CMDLINE_BUF_SIZE - 1], b'\r');
    }

    #[test]
    fn test_exec_request_tail_text() {
        let request = ExecRequest {
            function: EXEC_LOAD_AND_RUN,
            program: FarPtr::default(),
            param_block: FarPtr::default(),
            program_path: "C:\\COMMAND.COM".to_string(),
            command_tail: encode_command_tail(b"/E:2048 /C VER").to_vec(),
        };
        assert_eq!(request.tail_text(), "/E:2048 /C VER");
    }
}
