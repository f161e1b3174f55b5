use eko_shared::{Id, Member, Network, User};

use crate::database::{Database, Tx};

pub fn open() -> Database {
    Database::open_in_memory().unwrap()
}

/// User `seed` with key `[seed; 32]`.
pub fn new_user(tx: &Tx<'_>, seed: u8, name: &str) -> User {
    let user = User {
        id: Id(u64::from(seed)),
        name: name.to_string(),
        description: String::new(),
        public_key: [seed; 32],
        is_public_dm: true,
        is_deleted: false,
    };
    tx.insert_user(&user).unwrap();
    user
}

/// Network `seed` whose default frequency has id `seed * 1000`.
pub fn new_network(tx: &Tx<'_>, seed: u64, owner: Id) -> Network {
    let network = Network {
        id: Id(seed),
        owner_id: owner,
        name: format!("net-{seed}"),
        icon: String::new(),
        bg_hex: "#000000".into(),
        fg_hex: "#ffffff".into(),
        is_public: true,
    };
    tx.create_network(&network, Id(seed * 1000)).unwrap();
    network
}

pub fn add_member(tx: &Tx<'_>, network_id: Id, user_id: Id, is_admin: bool) {
    tx.upsert_member(&Member {
        network_id,
        user_id,
        is_member: true,
        is_admin,
        is_muted: false,
        is_banned: false,
        ban_reason: None,
    })
    .unwrap();
}
