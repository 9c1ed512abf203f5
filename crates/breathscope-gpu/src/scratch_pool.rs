//! Scratch texture pool.
//!
//! Same-shaped intermediates are recycled across batches instead of being
//! allocated per frame. Pooled textures are keyed by
//! (width, height, format, usage).

use crate::context::GpuContext;
use crate::texture::GpuTexture;
use crate::usage::{TextureFormat, TextureUsageSet};
use breathscope_core::Result;
use std::collections::HashMap;
use tracing::trace;

/// Key for pooled textures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct ScratchKey {
    width: u32,
    height: u32,
    format: TextureFormat,
    usage: TextureUsageSet,
}

impl ScratchKey {
    fn of(texture: &GpuTexture) -> Self {
        Self {
            width: texture.width,
            height: texture.height,
            format: texture.format,
            usage: texture.usage,
        }
    }
}

/// Pool of reusable scratch textures under a byte budget.
pub struct ScratchPool {
    free: HashMap<ScratchKey, Vec<GpuTexture>>,
    /// Bytes held by free textures.
    total_memory: usize,
    max_memory: usize,
    /// Textures created by this pool since construction.
    created: usize,
}

impl ScratchPool {
    pub fn new(max_memory: usize) -> Self {
        Self {
            free: HashMap::new(),
            total_memory: 0,
            max_memory,
            created: 0,
        }
    }

    /// Take a matching texture from the pool or create a new one.
    pub fn acquire(
        &mut self,
        ctx: &GpuContext,
        label: &str,
        width: u32,
        height: u32,
        format: TextureFormat,
        usage: TextureUsageSet,
    ) -> Result<GpuTexture> {
        let key = ScratchKey {
            width,
            height,
            format,
            usage,
        };

        if let Some(tex) = self.free.get_mut(&key).and_then(Vec::pop) {
            self.total_memory -= tex.memory_size();
            trace!(label, width, height, "Reusing scratch texture");
            return Ok(tex);
        }

        let tex = ctx.create_texture(label, width, height, format, usage)?;
        self.created += 1;
        Ok(tex)
    }

    /// Return a texture for reuse. Textures that would exceed the budget
    /// are destroyed immediately.
    pub fn release(&mut self, texture: GpuTexture) {
        let mem = texture.memory_size();
        if self.total_memory + mem > self.max_memory {
            texture.destroy();
            return;
        }
        self.total_memory += mem;
        self.free.entry(ScratchKey::of(&texture)).or_default().push(texture);
    }

    /// Bytes held by free textures.
    pub fn memory_usage(&self) -> usize {
        self.total_memory
    }

    /// Number of free textures.
    pub fn texture_count(&self) -> usize {
        self.free.values().map(Vec::len).sum()
    }

    /// Number of textures this pool has allocated.
    pub fn created_count(&self) -> usize {
        self.created
    }

    /// Destroy every pooled texture.
    pub fn clear(&mut self) {
        for tex in self.free.drain().flat_map(|(_, v)| v) {
            tex.destroy();
        }
        self.total_memory = 0;
    }
}

impl Drop for ScratchPool {
    fn drop(&mut self) {
        self.clear();
    }
}
