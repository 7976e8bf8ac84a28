//! Profile configuration: observable profile lists and the host facade.
//!
//! A profile is uniquely keyed by `(profile id, group, address)` within one
//! list. The host side owns the local list plus optional per-target detail
//! payloads; the client side mirrors a peer's list from its reports (see
//! `messenger` for the report handlers).

use bytes::Bytes;
use capwire::ProfileId;

use crate::callbacks::{CallbackRegistry, CallbackToken};

/// One profile on one `(group, address)` slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MidiCIProfile {
    pub profile: ProfileId,
    pub group: u8,
    pub address: u8,
    pub enabled: bool,
    pub num_channels_requested: u16,
}

/// Kind of change reported by the profiles-changed callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfilesChange {
    Added,
    Removed,
}

pub type ProfilesChangedCallback = Box<dyn FnMut(ProfilesChange, &MidiCIProfile)>;
pub type ProfileEnabledChangedCallback = Box<dyn FnMut(&MidiCIProfile)>;

/// A set of profiles with change notification.
#[derive(Default)]
pub struct ObservableProfileList {
    profiles: Vec<MidiCIProfile>,
    profiles_changed: CallbackRegistry<ProfilesChangedCallback>,
    enabled_changed: CallbackRegistry<ProfileEnabledChangedCallback>,
}

impl ObservableProfileList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn profiles(&self) -> &[MidiCIProfile] {
        &self.profiles
    }

    /// Insert a profile; a duplicate `(profile, group, address)` is ignored.
    pub fn add(&mut self, profile: MidiCIProfile) {
        let exists = self.profiles.iter().any(|p| {
            p.profile == profile.profile && p.group == profile.group && p.address == profile.address
        });
        if exists {
            return;
        }
        self.profiles.push(profile.clone());
        for callback in self.profiles_changed.iter_mut() {
            callback(ProfilesChange::Added, &profile);
        }
    }

    pub fn remove(&mut self, group: u8, address: u8, profile_id: ProfileId) {
        let mut removed = Vec::new();
        self.profiles.retain(|p| {
            let matches = p.profile == profile_id && p.group == group && p.address == address;
            if matches {
                removed.push(p.clone());
            }
            !matches
        });
        for profile in &removed {
            for callback in self.profiles_changed.iter_mut() {
                callback(ProfilesChange::Removed, profile);
            }
        }
    }

    /// Flip the enabled flag of a profile on the given address.
    /// Returns the updated profile when one matched.
    pub fn set_enabled(
        &mut self,
        enabled: bool,
        address: u8,
        profile_id: ProfileId,
        num_channels_requested: u16,
    ) -> Option<MidiCIProfile> {
        let updated = self
            .profiles
            .iter_mut()
            .find(|p| p.address == address && p.profile == profile_id)
            .map(|p| {
                p.enabled = enabled;
                p.num_channels_requested = num_channels_requested;
                p.clone()
            })?;
        for callback in self.enabled_changed.iter_mut() {
            callback(&updated);
        }
        Some(updated)
    }

    /// Move a profile to a new address / channel count.
    pub fn update(
        &mut self,
        profile_id: ProfileId,
        old_address: u8,
        enabled: bool,
        new_address: u8,
        num_channels_requested: u16,
    ) -> Option<MidiCIProfile> {
        let updated = self
            .profiles
            .iter_mut()
            .find(|p| p.address == old_address && p.profile == profile_id)
            .map(|p| {
                p.enabled = enabled;
                p.address = new_address;
                p.num_channels_requested = num_channels_requested;
                p.clone()
            })?;
        for callback in self.enabled_changed.iter_mut() {
            callback(&updated);
        }
        Some(updated)
    }

    /// Profile ids on `address` filtered by enabled state, in list order.
    pub fn matching_profiles(&self, address: u8, enabled: bool) -> Vec<ProfileId> {
        self.profiles
            .iter()
            .filter(|p| p.address == address && p.enabled == enabled)
            .map(|p| p.profile)
            .collect()
    }

    /// Distinct addresses that hold at least one profile, ascending.
    pub fn addresses(&self) -> Vec<u8> {
        let mut addresses: Vec<u8> = self.profiles.iter().map(|p| p.address).collect();
        addresses.sort_unstable();
        addresses.dedup();
        addresses
    }

    pub fn add_profiles_changed_callback(&mut self, callback: ProfilesChangedCallback) -> CallbackToken {
        self.profiles_changed.add(callback)
    }

    pub fn remove_profiles_changed_callback(&mut self, token: CallbackToken) -> bool {
        self.profiles_changed.remove(token)
    }

    pub fn add_profile_enabled_changed_callback(
        &mut self,
        callback: ProfileEnabledChangedCallback,
    ) -> CallbackToken {
        self.enabled_changed.add(callback)
    }

    pub fn remove_profile_enabled_changed_callback(&mut self, token: CallbackToken) -> bool {
        self.enabled_changed.remove(token)
    }
}

/// Detail payload served for a `(profile, target)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileDetailsEntry {
    pub profile: ProfileId,
    pub target: u8,
    pub data: Bytes,
}

/// Host side of the profile subsystem: the local profile list plus the
/// "on profile set" listener chain fired by enable/disable.
#[derive(Default)]
pub struct ProfileHost {
    profiles: ObservableProfileList,
    details: Vec<ProfileDetailsEntry>,
    on_profile_set: CallbackRegistry<ProfileEnabledChangedCallback>,
}

impl ProfileHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn profiles(&self) -> &ObservableProfileList {
        &self.profiles
    }

    pub fn profiles_mut(&mut self) -> &mut ObservableProfileList {
        &mut self.profiles
    }

    pub fn add_profile(&mut self, profile: MidiCIProfile) {
        self.profiles.add(profile);
    }

    pub fn remove_profile(&mut self, group: u8, address: u8, profile_id: ProfileId) {
        self.profiles.remove(group, address, profile_id);
    }

    /// Enable a profile and fire the "on profile set" chain. The broadcast
    /// report is the messenger's job.
    pub(crate) fn enable_profile(
        &mut self,
        address: u8,
        profile_id: ProfileId,
        num_channels: u16,
    ) -> Option<MidiCIProfile> {
        let updated = self.profiles.set_enabled(true, address, profile_id, num_channels)?;
        for callback in self.on_profile_set.iter_mut() {
            callback(&updated);
        }
        Some(updated)
    }

    pub(crate) fn disable_profile(
        &mut self,
        address: u8,
        profile_id: ProfileId,
        num_channels: u16,
    ) -> Option<MidiCIProfile> {
        let updated = self.profiles.set_enabled(false, address, profile_id, num_channels)?;
        for callback in self.on_profile_set.iter_mut() {
            callback(&updated);
        }
        Some(updated)
    }

    /// Detail payload for a Profile Details Inquiry, if one is registered.
    pub fn profile_details(&self, profile: ProfileId, target: u8) -> Option<Bytes> {
        self.details
            .iter()
            .find(|e| e.profile == profile && e.target == target)
            .map(|e| e.data.clone())
    }

    pub fn set_profile_details(&mut self, profile: ProfileId, target: u8, data: Bytes) {
        if let Some(entry) = self
            .details
            .iter_mut()
            .find(|e| e.profile == profile && e.target == target)
        {
            entry.data = data;
        } else {
            self.details.push(ProfileDetailsEntry { profile, target, data });
        }
    }

    pub fn add_on_profile_set_callback(&mut self, callback: ProfileEnabledChangedCallback) -> CallbackToken {
        self.on_profile_set.add(callback)
    }

    pub fn remove_on_profile_set_callback(&mut self, token: CallbackToken) -> bool {
        self.on_profile_set.remove(token)
    }
}

/// Channel count carried in a report, defaulted by address class: channel
/// addresses fall back to 1, group/function-block addresses force 0.
pub(crate) fn default_num_channels(address: u8, requested: u16) -> u16 {
    if address >= 0x7E {
        0
    } else if address < 0x10 && requested < 1 {
        1
    } else {
        requested
    }
}
