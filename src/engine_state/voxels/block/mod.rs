//! # Block Module
//!
//! Block types and the read-only catalog of their properties.
//!
//! The generation passes never hard-code what a block type means; they ask a
//! [`BlockRegistry`]. The built-in [`DefaultBlockRegistry`] is a static table,
//! but a host can plug in its own catalog.

use block_type::BlockType;

pub mod block_type;

/// The underlying integer type used to represent block types in memory.
pub type BlockTypeSize = u8;

/// The render pass a block's faces belong to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum RenderQueue {
    /// Not rendered at all.
    None,
    Opaque,
    Transparent,
}

/// Static properties of a block type.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BlockProperties {
    /// Solid blocks occlude neighbors and count towards the heightmap.
    pub is_solid: bool,
    pub is_liquid: bool,
    pub render_queue: RenderQueue,
}

/// Read-only catalog of block properties.
pub trait BlockRegistry: Send + Sync {
    fn properties(&self, block: BlockType) -> BlockProperties;

    fn is_solid(&self, block: BlockType) -> bool {
        self.properties(block).is_solid
    }

    fn is_liquid(&self, block: BlockType) -> bool {
        self.properties(block).is_liquid
    }

    fn render_queue(&self, block: BlockType) -> RenderQueue {
        self.properties(block).render_queue
    }

    /// Every block type the catalog knows about.
    fn block_types(&self) -> &[BlockType] {
        &BlockType::ALL
    }
}

/// Maps each block type (by storage index) to its properties.
static DEFAULT_PROPERTIES: [BlockProperties; 8] = [
    // Air
    BlockProperties {
        is_solid: false,
        is_liquid: false,
        render_queue: RenderQueue::None,
    },
    // Stone
    BlockProperties {
        is_solid: true,
        is_liquid: false,
        render_queue: RenderQueue::Opaque,
    },
    // Dirt
    BlockProperties {
        is_solid: true,
        is_liquid: false,
        render_queue: RenderQueue::Opaque,
    },
    // Grass
    BlockProperties {
        is_solid: true,
        is_liquid: false,
        render_queue: RenderQueue::Opaque,
    },
    // Sand
    BlockProperties {
        is_solid: true,
        is_liquid: false,
        render_queue: RenderQueue::Opaque,
    },
    // Gravel
    BlockProperties {
        is_solid: true,
        is_liquid: false,
        render_queue: RenderQueue::Opaque,
    },
    // Water
    BlockProperties {
        is_solid: false,
        is_liquid: true,
        render_queue: RenderQueue::Transparent,
    },
    // Lava
    BlockProperties {
        is_solid: false,
        is_liquid: true,
        render_queue: RenderQueue::Opaque,
    },
];

/// The built-in block catalog.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultBlockRegistry;

impl BlockRegistry for DefaultBlockRegistry {
    fn properties(&self, block: BlockType) -> BlockProperties {
        DEFAULT_PROPERTIES[block.to_storage() as usize]
    }
}
