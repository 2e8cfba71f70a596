//! Pipeline stages and their collaborators.
//!
//! Uploads arrive through the [`reassembler`]; [`conversion_service`] runs an
//! archive through [`password_resolver`], [`classifier`] and
//! [`document_assembler`]; [`lifecycle`] stamps and evicts what is stored.

pub mod archive_codec;
pub mod classifier;
pub mod conversion_service;
pub mod document_assembler;
pub mod lifecycle;
pub mod memory_store;
pub mod natural_order;
pub mod password_resolver;
pub mod pdf_writer;
pub mod reassembler;
pub mod storage_service;
