/// Ephemera content codecs
///
/// The message store treats content as opaque text. A codec decides what that
/// text is: the plaintext itself (`PlainCodec`) or a base64 AES-256-GCM sealed
/// box (`SealedCodec`) under a key shared out-of-band.
pub mod codec;
pub mod encrypt;
pub mod keys;

pub use codec::{ContentCodec, PlainCodec};
pub use encrypt::SealedCodec;
pub use keys::ContentKey;
