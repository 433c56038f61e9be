//! Sampler objects

use crate::backend::{AddressMode, FilterMode, SamplerDescriptor, SamplerHandle};
use crate::context::DeviceContext;
use crate::error::RenderResult;

#[derive(Debug)]
pub struct Sampler {
    handle: SamplerHandle,
    desc: SamplerDescriptor,
}

impl Sampler {
    pub fn new(
        ctx: &mut DeviceContext,
        address: AddressMode,
        filter: FilterMode,
        anisotropy: u16,
    ) -> RenderResult<Self> {
        let desc = SamplerDescriptor {
            label: None,
            address,
            filter,
            anisotropy: anisotropy.max(1),
        };
        let handle = ctx.create_sampler(&desc)?;
        Ok(Self { handle, desc })
    }

    pub fn handle(&self) -> SamplerHandle {
        self.handle
    }

    pub fn desc(&self) -> &SamplerDescriptor {
        &self.desc
    }

    pub fn destroy(self, ctx: &mut DeviceContext) -> RenderResult<()> {
        ctx.destroy_sampler(self.handle)
    }
}
