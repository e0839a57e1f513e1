//! Lead qualification: the dialogue that asks for details and the
//! extractor that turns a conversation into a `LeadRecord`.

pub mod dialogue;
pub mod extractor;
pub mod model;
pub mod prompts;

pub use dialogue::{DialogueConfig, DialogueTurn, LeadDialogue};
pub use extractor::LeadExtractor;
pub use model::{LeadField, LeadFields, LeadRecord, LeadSchema, normalize_value};
