//! In-memory projection of pairs and groups, kept current from bus events.
//!
//! Mutation happens only on the hub delivery path; every read hands out a
//! snapshot clone so callers never hold a lock while new events arrive.
//! Handlers tolerate out-of-order arrival: a permission update for a UID
//! we have not seen yet creates a placeholder row that later events fill
//! in.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::debug;

use charasync_net::bus::EventBus;
use charasync_net::events::{
    CharaDataReceived, GroupDeleted, GroupFullInfoReceived, GroupInfoReceived,
    GroupPairJoined, GroupPairLeft, GroupPairPermissionsChanged, GroupPairUserInfoChanged,
    GroupPermissionsChanged, OtherPairPermissionsChanged, PairAdded, PairRemoved,
    SelfPairPermissionsChanged, ServerStateChanged, SessionEstablished, UserOffline, UserOnline,
};
use charasync_net::Subscription;
use charasync_shared::protocol::CharaDataDto;
use charasync_shared::types::{GroupData, ServerState, UserData};
use charasync_shared::{
    EffectivePermissions, GroupPermissions, GroupUserPermissions, UserPermissions,
};

/// One paired relationship with a remote user.
#[derive(Debug, Clone)]
pub struct Pair {
    pub user: UserData,
    /// Online identity token; present only while the user is online.
    pub ident: Option<String>,
    /// Our permission bits toward them.
    pub own_permissions: UserPermissions,
    /// Their permission bits toward us.
    pub other_permissions: UserPermissions,
    /// Last character data they pushed to us.
    pub last_chara_data: Option<CharaDataDto>,
}

impl Pair {
    fn placeholder(user: UserData) -> Self {
        Self {
            user,
            ident: None,
            own_permissions: UserPermissions::none(),
            other_permissions: UserPermissions::none(),
            last_chara_data: None,
        }
    }

    pub fn is_online(&self) -> bool {
        self.ident.is_some()
    }
}

/// One member of a group.
#[derive(Debug, Clone)]
pub struct GroupMember {
    pub user: UserData,
    pub permissions: GroupUserPermissions,
}

/// A syncshell with its shared and per-member permission bits.
#[derive(Debug, Clone)]
pub struct Group {
    pub data: GroupData,
    pub owner: Option<UserData>,
    pub permissions: GroupPermissions,
    pub members: HashMap<String, GroupMember>,
}

impl Group {
    fn placeholder(data: GroupData) -> Self {
        Self {
            data,
            owner: None,
            permissions: GroupPermissions::none(),
            members: HashMap::new(),
        }
    }
}

#[derive(Default)]
struct RegistryInner {
    local_uid: RwLock<Option<String>>,
    pairs: RwLock<HashMap<String, Pair>>,
    groups: RwLock<HashMap<String, Group>>,
}

impl RegistryInner {
    fn with_pair(&self, user: UserData, update: impl FnOnce(&mut Pair)) {
        let mut pairs = self.pairs.write().expect("registry lock poisoned");
        let pair = pairs
            .entry(user.uid.clone())
            .or_insert_with(|| Pair::placeholder(user));
        update(pair);
    }

    fn with_group(&self, data: GroupData, update: impl FnOnce(&mut Group)) {
        let mut groups = self.groups.write().expect("registry lock poisoned");
        let group = groups
            .entry(data.gid.clone())
            .or_insert_with(|| Group::placeholder(data));
        update(group);
    }

    fn clear_idents(&self) {
        let mut pairs = self.pairs.write().expect("registry lock poisoned");
        for pair in pairs.values_mut() {
            pair.ident = None;
        }
    }
}

/// Pairing/group registry. Owns its bus subscriptions; dropping the
/// registry detaches every handler.
pub struct SyncRegistry {
    inner: Arc<RegistryInner>,
    _subs: Vec<Subscription>,
}

impl SyncRegistry {
    pub fn new(bus: &Arc<EventBus>) -> Self {
        let inner = Arc::new(RegistryInner::default());
        let mut subs = Vec::new();

        {
            let state = Arc::clone(&inner);
            subs.push(bus.subscribe::<SessionEstablished>(move |e| {
                *state.local_uid.write().expect("registry lock poisoned") =
                    Some(e.connection.user.uid.clone());
            }));
        }
        {
            let state = Arc::clone(&inner);
            subs.push(bus.subscribe::<ServerStateChanged>(move |e| {
                // Session teardown invalidates the online roster but keeps
                // the pair rows themselves.
                if matches!(e.state, ServerState::Disconnected | ServerState::Offline) {
                    state.clear_idents();
                }
            }));
        }
        {
            let state = Arc::clone(&inner);
            subs.push(bus.subscribe::<PairAdded>(move |e| {
                debug!(uid = %e.0.user.uid, "Pair added");
                let permissions = e.0.permissions;
                state.with_pair(e.0.user.clone(), |pair| {
                    pair.own_permissions = permissions;
                });
            }));
        }
        {
            let state = Arc::clone(&inner);
            subs.push(bus.subscribe::<PairRemoved>(move |e| {
                debug!(uid = %e.user.uid, "Pair removed");
                state
                    .pairs
                    .write()
                    .expect("registry lock poisoned")
                    .remove(&e.user.uid);
            }));
        }
        {
            let state = Arc::clone(&inner);
            subs.push(bus.subscribe::<UserOnline>(move |e| {
                let ident = e.ident.clone();
                state.with_pair(e.user.clone(), |pair| {
                    pair.ident = Some(ident);
                });
            }));
        }
        {
            let state = Arc::clone(&inner);
            subs.push(bus.subscribe::<UserOffline>(move |e| {
                state.with_pair(e.user.clone(), |pair| {
                    pair.ident = None;
                });
            }));
        }
        {
            let state = Arc::clone(&inner);
            subs.push(bus.subscribe::<SelfPairPermissionsChanged>(move |e| {
                let permissions = e.0.permissions;
                state.with_pair(e.0.user.clone(), |pair| {
                    pair.own_permissions = permissions;
                });
            }));
        }
        {
            let state = Arc::clone(&inner);
            subs.push(bus.subscribe::<OtherPairPermissionsChanged>(move |e| {
                let permissions = e.0.permissions;
                state.with_pair(e.0.user.clone(), |pair| {
                    pair.other_permissions = permissions;
                });
            }));
        }
        {
            let state = Arc::clone(&inner);
            subs.push(bus.subscribe::<CharaDataReceived>(move |e| {
                let data = e.0.clone();
                state.with_pair(e.0.owner.clone(), |pair| {
                    pair.last_chara_data = Some(data);
                });
            }));
        }
        {
            let state = Arc::clone(&inner);
            subs.push(bus.subscribe::<GroupFullInfoReceived>(move |e| {
                let mut members = HashMap::new();
                for member in &e.0.members {
                    members.insert(
                        member.user.uid.clone(),
                        GroupMember {
                            user: member.user.clone(),
                            permissions: member.permissions,
                        },
                    );
                }
                let owner = e.0.owner.clone();
                let permissions = e.0.group_permissions;
                state.with_group(e.0.group.clone(), |group| {
                    group.owner = Some(owner);
                    group.permissions = permissions;
                    group.members = members;
                });
            }));
        }
        {
            let state = Arc::clone(&inner);
            subs.push(bus.subscribe::<GroupInfoReceived>(move |e| {
                let permissions = e.0.permissions;
                state.with_group(e.0.group.clone(), |group| {
                    group.permissions = permissions;
                });
            }));
        }
        {
            let state = Arc::clone(&inner);
            subs.push(bus.subscribe::<GroupPermissionsChanged>(move |e| {
                let permissions = e.0.permissions;
                state.with_group(e.0.group.clone(), |group| {
                    group.permissions = permissions;
                });
            }));
        }
        {
            let state = Arc::clone(&inner);
            subs.push(bus.subscribe::<GroupDeleted>(move |e| {
                debug!(gid = %e.group.gid, "Group deleted");
                state
                    .groups
                    .write()
                    .expect("registry lock poisoned")
                    .remove(&e.group.gid);
            }));
        }
        {
            let state = Arc::clone(&inner);
            subs.push(bus.subscribe::<GroupPairJoined>(move |e| {
                let user = e.user.clone();
                state.with_group(e.group.clone(), |group| {
                    group.members.insert(
                        user.uid.clone(),
                        GroupMember {
                            user,
                            permissions: GroupUserPermissions::none(),
                        },
                    );
                });
            }));
        }
        {
            let state = Arc::clone(&inner);
            subs.push(bus.subscribe::<GroupPairLeft>(move |e| {
                let uid = e.user.uid.clone();
                state.with_group(e.group.clone(), |group| {
                    group.members.remove(&uid);
                });
            }));
        }
        {
            let state = Arc::clone(&inner);
            subs.push(bus.subscribe::<GroupPairPermissionsChanged>(move |e| {
                let user = e.0.user.clone();
                let permissions = e.0.permissions;
                state.with_group(e.0.group.clone(), |group| {
                    group
                        .members
                        .entry(user.uid.clone())
                        .or_insert_with(|| GroupMember {
                            user,
                            permissions: GroupUserPermissions::none(),
                        })
                        .permissions = permissions;
                });
            }));
        }
        {
            let state = Arc::clone(&inner);
            subs.push(bus.subscribe::<GroupPairUserInfoChanged>(move |e| {
                let user = e.user.clone();
                state.with_group(e.group.clone(), |group| {
                    if let Some(member) = group.members.get_mut(&user.uid) {
                        member.user = user;
                    }
                });
            }));
        }

        Self {
            inner,
            _subs: subs,
        }
    }

    /// UID of the local user, known once a session has been established.
    pub fn local_uid(&self) -> Option<String> {
        self.inner
            .local_uid
            .read()
            .expect("registry lock poisoned")
            .clone()
    }

    pub fn pair(&self, uid: &str) -> Option<Pair> {
        self.inner
            .pairs
            .read()
            .expect("registry lock poisoned")
            .get(uid)
            .cloned()
    }

    pub fn pairs(&self) -> Vec<Pair> {
        self.inner
            .pairs
            .read()
            .expect("registry lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    pub fn online_pairs(&self) -> Vec<Pair> {
        self.inner
            .pairs
            .read()
            .expect("registry lock poisoned")
            .values()
            .filter(|pair| pair.is_online())
            .cloned()
            .collect()
    }

    pub fn group(&self, gid: &str) -> Option<Group> {
        self.inner
            .groups
            .read()
            .expect("registry lock poisoned")
            .get(gid)
            .cloned()
    }

    pub fn groups(&self) -> Vec<Group> {
        self.inner
            .groups
            .read()
            .expect("registry lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Effective restrictions toward `uid`, ORed across every scope the
    /// user appears in: both sides of the individual pair, each shared
    /// group's permissions, and both members' per-group bits.
    pub fn effective_permissions(&self, uid: &str) -> EffectivePermissions {
        let mut effective = EffectivePermissions::default();

        if let Some(pair) = self.pair(uid) {
            effective.apply_user(pair.own_permissions);
            effective.apply_user(pair.other_permissions);
        }

        let local_uid = self.local_uid();
        let groups = self.inner.groups.read().expect("registry lock poisoned");
        for group in groups.values() {
            let Some(member) = group.members.get(uid) else {
                continue;
            };
            effective.apply_group(group.permissions);
            effective.apply_group_user(member.permissions);
            if let Some(local) = local_uid.as_deref() {
                if let Some(local_member) = group.members.get(local) {
                    effective.apply_group_user(local_member.permissions);
                }
            }
        }

        effective
    }
}
