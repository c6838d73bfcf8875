pub mod checksum;
pub mod keystream;
pub mod codec;
pub mod archive;
pub mod mutate;
pub mod save;
pub mod dump;

pub use archive::{ArchiveError, DrpArchive, FileEntry};
pub use codec::{get_codec, Codec, CodecId};
pub use keystream::{effective_seed, Keystream, SeedTable};
pub use save::{SaveEntry, SaveError, SaveFile, SaveFileHeader};
