//! Length-prefixed framing for envelope messages.
//!
//! A frame is a u32 big-endian body length followed by the encoded
//! message. Bodies above [`MAX_FRAME_LEN`] are rejected on both sides so
//! a corrupt prefix cannot trigger an unbounded allocation.

use prost::Message;

use crate::{MAX_FRAME_LEN, WireError};

/// Length of the frame header.
pub const HEADER_LEN: usize = 4;

/// Encode a message into a length-prefixed frame.
pub fn encode_frame<M: Message>(msg: &M) -> Result<Vec<u8>, WireError> {
  let body = msg.encode_to_vec();
  if body.len() > MAX_FRAME_LEN {
    return Err(WireError::FrameTooLarge);
  }
  let mut out = Vec::with_capacity(HEADER_LEN + body.len());
  out.extend_from_slice(&(body.len() as u32).to_be_bytes());
  out.extend_from_slice(&body);
  Ok(out)
}

/// Decode one frame from the front of `buf`, returning the message and
/// the number of bytes consumed. `Truncated` means more data is needed.
pub fn decode_frame<M: Message + Default>(buf: &[u8]) -> Result<(M, usize), WireError> {
  if buf.len() < HEADER_LEN {
    return Err(WireError::Truncated);
  }
  let body_len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
  if body_len > MAX_FRAME_LEN {
    return Err(WireError::FrameTooLarge);
  }
  if buf.len() < HEADER_LEN + body_len {
    return Err(WireError::Truncated);
  }
  let msg = M::decode(&buf[HEADER_LEN..HEADER_LEN + body_len])?;
  Ok((msg, HEADER_LEN + body_len))
}

/// Read the body length from a frame header.
pub fn body_len(header: [u8; HEADER_LEN]) -> Result<usize, WireError> {
  let len = u32::from_be_bytes(header) as usize;
  if len > MAX_FRAME_LEN {
    return Err(WireError::FrameTooLarge);
  }
  Ok(len)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{ClientFrame, client_frame};

  #[test]
  fn frame_round_trip() {
    let frame = ClientFrame::hello("token-123", "test-client");
    let bytes = encode_frame(&frame).unwrap();
    let (decoded, used) = decode_frame::<ClientFrame>(&bytes).unwrap();
    assert_eq!(used, bytes.len());
    match decoded.payload {
      Some(client_frame::Payload::Hello(hello)) => {
        assert_eq!(hello.bearer_token, "token-123");
        assert_eq!(hello.client_name, "test-client");
      }
      other => panic!("unexpected payload: {other:?}"),
    }
  }

  #[test]
  fn partial_frames_ask_for_more_data() {
    let bytes = encode_frame(&ClientFrame::health()).unwrap();
    for cut in 0..bytes.len() {
      assert!(matches!(
        decode_frame::<ClientFrame>(&bytes[..cut]),
        Err(WireError::Truncated)
      ));
    }
  }

  #[test]
  fn oversize_prefix_is_rejected_before_allocation() {
    let mut header = Vec::new();
    header.extend_from_slice(&(u32::MAX).to_be_bytes());
    assert!(matches!(
      decode_frame::<ClientFrame>(&header),
      Err(WireError::FrameTooLarge)
    ));
  }

  #[test]
  fn two_frames_decode_back_to_back() {
    let mut bytes = encode_frame(&ClientFrame::health()).unwrap();
    bytes.extend(encode_frame(&ClientFrame::complete()).unwrap());

    let (first, used) = decode_frame::<ClientFrame>(&bytes).unwrap();
    assert!(matches!(
      first.payload,
      Some(client_frame::Payload::Health(_))
    ));
    let (second, _) = decode_frame::<ClientFrame>(&bytes[used..]).unwrap();
    assert!(matches!(
      second.payload,
      Some(client_frame::Payload::Complete(_))
    ));
  }
}
