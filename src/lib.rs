pub mod apk;
pub mod catalog;
pub mod decode;
mod reader;
pub mod serialized_file;
pub mod typetree;

use anyhow::{Context, Result, ensure};

use crate::reader::EndianReader;
use crate::serialized_file::{CLASS_ID_MONO_BEHAVIOUR, ObjectInfo, PPtr, SerializedFile};
use crate::typetree::Schema;

/// Backing buffer of one opened member, owned or memory-mapped.
#[derive(Debug)]
pub enum Data {
    InMemory(Vec<u8>),
    Mmap(memmap2::Mmap),
}

impl Data {
    pub fn len(&self) -> usize {
        self.as_ref().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_ref().is_empty()
    }
}

impl AsRef<[u8]> for Data {
    fn as_ref(&self) -> &[u8] {
        match self {
            Data::InMemory(data) => data,
            Data::Mmap(mmap) => mmap,
        }
    }
}

impl From<Vec<u8>> for Data {
    fn from(data: Vec<u8>) -> Data {
        Data::InMemory(data)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error("required member '{member}' is not present")]
    MemberMissing { member: String },
    #[error("no behaviour with script '{script}' was found. Found scripts: {found}")]
    ScriptNotFound { script: String, found: String },
    #[error("external file '{path}' is not an opened member")]
    ExternalMissing { path: String },
    #[error("object {path_id} does not exist in '{member}'")]
    ObjectMissing { path_id: i64, member: String },
}

#[derive(Debug)]
struct Member {
    name: String,
    file: SerializedFile,
    data: Data,
}

/// One logical object space spanning the opened serialized file members.
/// Read-only for the duration of one extraction run.
#[derive(Debug)]
pub struct Environment {
    members: Vec<Member>,
}

impl Environment {
    pub fn open(members: impl IntoIterator<Item = (String, Data)>) -> Result<Environment> {
        let members = members
            .into_iter()
            .map(|(name, data)| {
                let file = SerializedFile::from_reader(data.as_ref())
                    .with_context(|| format!("failed to parse serialized file '{name}'"))?;
                tracing::debug!(
                    "opened '{name}' ({} bytes): {} objects, unity {}",
                    data.len(),
                    file.m_Objects.len(),
                    file.m_UnityVersion
                );
                Ok(Member { name, file, data })
            })
            .collect::<Result<Vec<_>>>()?;
        ensure!(!members.is_empty(), "no members to open");
        Ok(Environment { members })
    }

    /// Finds the first `MonoBehaviour` object whose `MonoScript` is named
    /// `script_name`, across all members.
    pub fn find_behaviour(&self, script_name: &str) -> Result<ObjectHandle<'_>, LookupError> {
        let mut found = Vec::new();
        for (member_index, member) in self.members.iter().enumerate() {
            for (script_index, &script) in member.file.m_ScriptTypes.iter().enumerate() {
                let name = match self.script_name(member_index, script) {
                    Ok(name) => name,
                    Err(err) => {
                        // Script lives in a member we were not given; it
                        // cannot be the one we are after.
                        tracing::debug!("skipping unresolvable script reference: {err}");
                        continue;
                    }
                };
                if name == script_name {
                    let object = member.file.objects().find(|info| {
                        let ty = member.file.serialized_type(info);
                        ty.m_ClassID == CLASS_ID_MONO_BEHAVIOUR
                            && ty.m_ScriptTypeIndex == script_index as i16
                    });
                    if let Some(info) = object {
                        return Ok(ObjectHandle {
                            env: self,
                            member: member_index,
                            info,
                        });
                    }
                }
                found.push(name);
            }
        }
        Err(LookupError::ScriptNotFound {
            script: script_name.to_owned(),
            found: match found.is_empty() {
                true => "none".to_owned(),
                false => found.join(", "),
            },
        })
    }

    /// Resolves a script reference to the `MonoScript`'s class name (its
    /// leading `m_Name` field).
    fn script_name(&self, from: usize, script: PPtr) -> Result<String, LookupError> {
        let member = self.resolve_member(from, script.m_FileID)?;
        let missing = || LookupError::ObjectMissing {
            path_id: script.m_PathID,
            member: member.name.clone(),
        };
        let info = member.file.object_at(script.m_PathID).ok_or_else(missing)?;
        let data = member
            .file
            .object_slice(info, member.data.as_ref())
            .map_err(|_| missing())?;

        let mut reader = EndianReader::new(data, member.file.big_endian());
        let len = reader.u32().map_err(|_| missing())?;
        let bytes = reader.bytes(len as usize).map_err(|_| missing())?;
        String::from_utf8(bytes.to_vec()).map_err(|_| missing())
    }

    fn resolve_member(&self, from: usize, file_id: i32) -> Result<&Member, LookupError> {
        if file_id == 0 {
            return Ok(&self.members[from]);
        }
        let externals = &self.members[from].file.m_Externals;
        let external =
            externals
                .get(file_id as usize - 1)
                .ok_or_else(|| LookupError::ExternalMissing {
                    path: format!("<external #{file_id}>"),
                })?;
        // Externals reference bare file names; members may be stored under
        // an archive prefix like assets/bin/Data/.
        let target = basename(&external.pathName);
        self.members
            .iter()
            .find(|member| basename(&member.name) == target)
            .ok_or_else(|| LookupError::ExternalMissing {
                path: external.pathName.clone(),
            })
    }
}

fn basename(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

/// Handle to one serialized object inside an [`Environment`].
#[derive(Debug)]
pub struct ObjectHandle<'a> {
    env: &'a Environment,
    member: usize,
    pub info: &'a ObjectInfo,
}

impl<'a> ObjectHandle<'a> {
    pub fn path_id(&self) -> i64 {
        self.info.m_PathID
    }

    /// The object's raw payload slice.
    pub fn data(&self) -> Result<&'a [u8]> {
        let member = &self.env.members[self.member];
        member.file.object_slice(self.info, member.data.as_ref())
    }

    /// Reconstructs the object as a nested record according to `schema`.
    pub fn decode(&self, schema: &Schema) -> Result<serde_json::Value> {
        let member = &self.env.members[self.member];
        let data = self.data()?;
        let value = decode::decode_object(data, schema, member.file.big_endian())
            .with_context(|| format!("failed to decode object {}", self.info.m_PathID))?;
        Ok(value)
    }
}
