//! These models represent the objects passed around by the agent
//!
//! There are several related formats we need to interact with:
//! - chat messages/tools sent from a chat interface to the agent
//! - data-stream frames sent from the agent back to the interface
//! - openai-style messages/tools sent from the agent to the LLM
//!
//! These overlap but do not coincide, so incoming and outgoing payloads are
//! converted to and from the internal structs at each boundary.
pub mod message;
pub mod role;
pub mod tool;
