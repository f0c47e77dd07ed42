//! Permission bitsets and effective-permission composition.
//!
//! Each scope (individual pair, group, per-member-in-group) carries its own
//! bitset. Bit positions are part of the wire contract and must not be
//! renumbered. Scopes combine by bitwise OR only: any scope disabling a
//! capability disables it, and no scope can re-enable what another turned
//! off.

use serde::{Deserialize, Serialize};

/// Permission bits of an individual pair, one side's view.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserPermissions(u32);

impl UserPermissions {
    pub const NONE_SET: u32 = 0;
    pub const PAIRED: u32 = 1;
    pub const PAUSED: u32 = 2;
    pub const DISABLE_ANIMATIONS: u32 = 4;
    pub const DISABLE_SOUNDS: u32 = 8;
    pub const DISABLE_VFX: u32 = 16;

    pub fn none() -> Self {
        Self(Self::NONE_SET)
    }

    pub fn is_paired(&self) -> bool {
        self.0 & Self::PAIRED != 0
    }

    pub fn is_paused(&self) -> bool {
        self.0 & Self::PAUSED != 0
    }

    pub fn animations_disabled(&self) -> bool {
        self.0 & Self::DISABLE_ANIMATIONS != 0
    }

    pub fn sounds_disabled(&self) -> bool {
        self.0 & Self::DISABLE_SOUNDS != 0
    }

    pub fn vfx_disabled(&self) -> bool {
        self.0 & Self::DISABLE_VFX != 0
    }

    pub fn set_paired(&mut self, on: bool) {
        self.set_bit(Self::PAIRED, on);
    }

    pub fn set_paused(&mut self, on: bool) {
        self.set_bit(Self::PAUSED, on);
    }

    pub fn set_animations_disabled(&mut self, on: bool) {
        self.set_bit(Self::DISABLE_ANIMATIONS, on);
    }

    pub fn set_sounds_disabled(&mut self, on: bool) {
        self.set_bit(Self::DISABLE_SOUNDS, on);
    }

    pub fn set_vfx_disabled(&mut self, on: bool) {
        self.set_bit(Self::DISABLE_VFX, on);
    }

    fn set_bit(&mut self, bit: u32, on: bool) {
        if on {
            self.0 |= bit;
        } else {
            self.0 &= !bit;
        }
    }
}

/// Permission bits applying to a whole group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupPermissions(u32);

impl GroupPermissions {
    pub const NONE_SET: u32 = 0;
    pub const DISABLE_ANIMATIONS: u32 = 1;
    pub const DISABLE_SOUNDS: u32 = 2;
    pub const DISABLE_INVITES: u32 = 4;
    pub const DISABLE_VFX: u32 = 8;

    pub fn none() -> Self {
        Self(Self::NONE_SET)
    }

    pub fn animations_disabled(&self) -> bool {
        self.0 & Self::DISABLE_ANIMATIONS != 0
    }

    pub fn sounds_disabled(&self) -> bool {
        self.0 & Self::DISABLE_SOUNDS != 0
    }

    pub fn invites_disabled(&self) -> bool {
        self.0 & Self::DISABLE_INVITES != 0
    }

    pub fn vfx_disabled(&self) -> bool {
        self.0 & Self::DISABLE_VFX != 0
    }

    pub fn set_animations_disabled(&mut self, on: bool) {
        self.set_bit(Self::DISABLE_ANIMATIONS, on);
    }

    pub fn set_sounds_disabled(&mut self, on: bool) {
        self.set_bit(Self::DISABLE_SOUNDS, on);
    }

    pub fn set_invites_disabled(&mut self, on: bool) {
        self.set_bit(Self::DISABLE_INVITES, on);
    }

    pub fn set_vfx_disabled(&mut self, on: bool) {
        self.set_bit(Self::DISABLE_VFX, on);
    }

    fn set_bit(&mut self, bit: u32, on: bool) {
        if on {
            self.0 |= bit;
        } else {
            self.0 &= !bit;
        }
    }
}

/// Permission bits of one member within one group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupUserPermissions(u32);

impl GroupUserPermissions {
    pub const NONE_SET: u32 = 0;
    pub const PAUSED: u32 = 1;
    pub const DISABLE_ANIMATIONS: u32 = 2;
    pub const DISABLE_SOUNDS: u32 = 4;
    pub const DISABLE_VFX: u32 = 8;

    pub fn none() -> Self {
        Self(Self::NONE_SET)
    }

    pub fn is_paused(&self) -> bool {
        self.0 & Self::PAUSED != 0
    }

    pub fn animations_disabled(&self) -> bool {
        self.0 & Self::DISABLE_ANIMATIONS != 0
    }

    pub fn sounds_disabled(&self) -> bool {
        self.0 & Self::DISABLE_SOUNDS != 0
    }

    pub fn vfx_disabled(&self) -> bool {
        self.0 & Self::DISABLE_VFX != 0
    }

    pub fn set_paused(&mut self, on: bool) {
        self.set_bit(Self::PAUSED, on);
    }

    pub fn set_animations_disabled(&mut self, on: bool) {
        self.set_bit(Self::DISABLE_ANIMATIONS, on);
    }

    pub fn set_sounds_disabled(&mut self, on: bool) {
        self.set_bit(Self::DISABLE_SOUNDS, on);
    }

    pub fn set_vfx_disabled(&mut self, on: bool) {
        self.set_bit(Self::DISABLE_VFX, on);
    }

    fn set_bit(&mut self, bit: u32, on: bool) {
        if on {
            self.0 |= bit;
        } else {
            self.0 &= !bit;
        }
    }
}

/// The capability restrictions that actually apply to a pair after every
/// scope has been folded in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EffectivePermissions {
    pub paused: bool,
    pub disable_animations: bool,
    pub disable_sounds: bool,
    pub disable_vfx: bool,
}

impl EffectivePermissions {
    /// Fold an individual-pair scope in. OR-only.
    pub fn apply_user(&mut self, perms: UserPermissions) {
        self.paused |= perms.is_paused();
        self.disable_animations |= perms.animations_disabled();
        self.disable_sounds |= perms.sounds_disabled();
        self.disable_vfx |= perms.vfx_disabled();
    }

    /// Fold a group scope in. Groups have no pause bit.
    pub fn apply_group(&mut self, perms: GroupPermissions) {
        self.disable_animations |= perms.animations_disabled();
        self.disable_sounds |= perms.sounds_disabled();
        self.disable_vfx |= perms.vfx_disabled();
    }

    /// Fold a per-member-in-group scope in. OR-only.
    pub fn apply_group_user(&mut self, perms: GroupUserPermissions) {
        self.paused |= perms.is_paused();
        self.disable_animations |= perms.animations_disabled();
        self.disable_sounds |= perms.sounds_disabled();
        self.disable_vfx |= perms.vfx_disabled();
    }
}
