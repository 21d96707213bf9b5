use std::io;
use std::sync::Arc;

use crate::entry_path::EntryPath;
use crate::root::{not_found, Root, RootKind};

/// Several roots presented as one, the first member to know a path wins.
///
/// A class path never indexes a `JoinedRoot` itself, it adds each member on
/// its own.
#[derive(Debug)]
pub struct JoinedRoot {
    name: String,
    members: Vec<Arc<dyn Root>>,
}

impl JoinedRoot {
    pub fn new(name: impl Into<String>, members: Vec<Arc<dyn Root>>) -> Arc<JoinedRoot> {
        Arc::new(JoinedRoot {
            name: name.into(),
            members,
        })
    }

    pub fn members(&self) -> &[Arc<dyn Root>] {
        &self.members
    }
}

impl Root for JoinedRoot {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> RootKind<'_> {
        RootKind::Composite(&self.members)
    }

    fn resolve(&self, path: &str) -> Option<Arc<EntryPath>> {
        self.members.iter().find_map(|member| member.resolve(path))
    }

    fn read(&self, path: &EntryPath) -> io::Result<Vec<u8>> {
        let key = path.to_string();
        match self.members.iter().find(|m| m.resolve(&key).is_some()) {
            Some(member) => member.read(path),
            None => Err(not_found(self, path)),
        }
    }
}
