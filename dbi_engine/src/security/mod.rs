pub mod secure_buffer;

pub use secure_buffer::SecureBuffer;
