//! Server side of the block protocol.
//!
//! [`respond`] answers a peer's request from the chain. Responses and
//! announcements produce no reply here; announced blocks are routed to the
//! ingestion queue by the node.

use lode_chain::{Chain, ChainStore};
use lode_core::constants::{CHAIN_PRIMARY_CHUNK, MAX_BLOCK_REQUEST};
use lode_core::error::ChainError;
use lode_network::Message;

/// Answer a request message, or `None` when the message expects no reply.
pub fn respond<S: ChainStore>(
    chain: &Chain<S>,
    request: &Message,
) -> Result<Option<Message>, ChainError> {
    match request {
        Message::ChainInfoRequest => Ok(Some(Message::ChainInfo {
            top_block: chain.head().hash(),
            total_work: chain.head().total_work,
        })),
        Message::ChainPrimaryRequest {
            block_locator,
            chunk_size,
            chunk_n,
        } => {
            let chunk_size = (*chunk_size).min(CHAIN_PRIMARY_CHUNK);
            let (hashes, total_works) =
                chain.primary_segment(block_locator, chunk_size, *chunk_n)?;
            Ok(Some(Message::ChainPrimary {
                hashes,
                total_works,
                chunk_n: *chunk_n,
                chunk_size,
            }))
        }
        Message::BlockRequest { hashes } => {
            let mut blocks = Vec::new();
            for hash in hashes.iter().take(MAX_BLOCK_REQUEST) {
                // Unknown hashes are silently omitted.
                match chain.get_block(hash) {
                    Ok(block) => blocks.push(block),
                    Err(ChainError::NotFound(_)) => {}
                    Err(e) => return Err(e),
                }
            }
            Ok(Some(Message::BlockProvide { blocks }))
        }
        Message::InvRequest => Ok(Some(Message::InvProvide {
            inv_list: chain.linked_hashes(),
        })),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lode_chain::MemoryStore;
    use lode_core::genesis;
    use lode_core::types::Hash256;

    fn root_chain() -> Chain<MemoryStore> {
        Chain::new(MemoryStore::new()).unwrap()
    }

    #[test]
    fn chain_info_reports_the_head() {
        let chain = root_chain();
        let reply = respond(&chain, &Message::ChainInfoRequest).unwrap();
        assert_eq!(
            reply,
            Some(Message::ChainInfo {
                top_block: genesis::root_hash(),
                total_work: genesis::root_block().total_work,
            })
        );
    }

    #[test]
    fn inventory_lists_linked_blocks() {
        let chain = root_chain();
        let reply = respond(&chain, &Message::InvRequest).unwrap();
        assert_eq!(
            reply,
            Some(Message::InvProvide {
                inv_list: vec![genesis::root_hash()],
            })
        );
    }

    #[test]
    fn block_request_omits_unknown_hashes() {
        let chain = root_chain();
        let request = Message::BlockRequest {
            hashes: vec![genesis::root_hash(), Hash256([0xEE; 32])],
        };
        let reply = respond(&chain, &request).unwrap();
        assert_eq!(
            reply,
            Some(Message::BlockProvide {
                blocks: vec![genesis::root_block().clone()],
            })
        );
    }

    #[test]
    fn primary_request_chunk_size_is_capped() {
        let chain = root_chain();
        let request = Message::ChainPrimaryRequest {
            block_locator: vec![genesis::root_hash()],
            chunk_size: u64::MAX,
            chunk_n: 0,
        };
        let reply = respond(&chain, &request).unwrap();
        match reply {
            Some(Message::ChainPrimary {
                hashes, chunk_size, ..
            }) => {
                assert!(hashes.is_empty());
                assert_eq!(chunk_size, CHAIN_PRIMARY_CHUNK);
            }
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[test]
    fn non_requests_get_no_reply() {
        let chain = root_chain();
        let announce = Message::BlockAnnounce {
            block: genesis::root_block().clone(),
        };
        assert_eq!(respond(&chain, &announce).unwrap(), None);
    }
}
