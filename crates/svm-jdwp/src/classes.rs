//! Reference types, fields and methods known to the debugged application.

use svm_config::{ClassConfig, DebugServerConfig};

use crate::codec::{str_size, Packet, PacketFactory, PacketList};
use crate::types::{
    class_name_to_signature, FieldId, MethodId, ReferenceTypeId, CLASS_STATUS_INITIALIZED,
    CLASS_STATUS_PREPARED, CLASS_STATUS_VERIFIED, TYPE_TAG_CLASS, TYPE_TAG_INTERFACE,
};

pub const JAVA_LANG_OBJECT: &str = "java.lang.Object";
pub const JAVA_LANG_ERROR: &str = "java.lang.Error";

const ACC_PUBLIC: u32 = 0x0001;
const ACC_STATIC: u32 = 0x0008;
const ACC_SYNTHETIC: u32 = 0x1000;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldInfo {
    pub id: FieldId,
    pub name: String,
    pub signature: String,
    pub modifiers: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LineTable {
    pub start: u64,
    pub end: u64,
    /// `(code_index, line_number)` pairs in ascending code-index order.
    pub lines: Vec<(u64, u32)>,
}

impl LineTable {
    pub fn new(mut lines: Vec<(u64, u32)>) -> Self {
        lines.sort_by_key(|&(index, _)| index);
        let start = lines.first().map_or(0, |&(index, _)| index);
        let end = lines.last().map_or(0, |&(index, _)| index);
        Self { start, end, lines }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodInfo {
    pub id: MethodId,
    pub name: String,
    pub signature: String,
    pub modifiers: u32,
    pub line_table: LineTable,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefType {
    pub id: ReferenceTypeId,
    pub type_tag: u8,
    pub name: String,
    pub signature: String,
    pub source_file: Option<String>,
    pub modifiers: u32,
    pub status: u32,
    pub superclass: Option<ReferenceTypeId>,
    pub interfaces: Vec<ReferenceTypeId>,
    pub fields: Vec<FieldInfo>,
    pub methods: Vec<MethodInfo>,
}

impl RefType {
    pub fn method(&self, id: MethodId) -> Option<&MethodInfo> {
        self.methods.iter().find(|m| m.id == id)
    }
}

/// Registry of every reference type the debugger may ask about.
///
/// Built once at startup and shared read-only afterwards. Reference ids are
/// handed out from 1 in registration order.
#[derive(Clone, Debug)]
pub struct ClassRegistry {
    classes: Vec<RefType>,
    next_id: ReferenceTypeId,
    main_class: Option<ReferenceTypeId>,
}

impl Default for ClassRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ClassRegistry {
    /// A registry holding only `java.lang.Object` and `java.lang.Error`.
    pub fn new() -> Self {
        let mut registry = Self {
            classes: Vec::new(),
            next_id: 1,
            main_class: None,
        };
        let object = registry.add_class(JAVA_LANG_OBJECT, None);
        registry.add_class(JAVA_LANG_ERROR, Some(object));
        registry
    }

    pub fn from_config(config: &DebugServerConfig) -> Self {
        let mut registry = Self::new();
        for class in &config.classes {
            registry.add_configured(class);
        }

        let main = &config.vm.main_class;
        let main_id = match registry.find_by_name(main) {
            Some(existing) => existing.id,
            None => registry.add_default_main(main, &config.vm.main_source),
        };
        registry.main_class = Some(main_id);
        registry.add_inner_wildcard(main_id);

        tracing::debug!(
            target: "svm.jdwp",
            classes = registry.classes.len(),
            main_class = %main,
            "class registry loaded"
        );
        registry
    }

    fn add_configured(&mut self, class: &ClassConfig) {
        let superclass = match class.superclass.as_deref() {
            Some(name) => {
                let found = self.find_by_name(name).map(|c| c.id);
                if found.is_none() {
                    tracing::warn!(
                        target: "svm.jdwp",
                        class = %class.name,
                        superclass = %name,
                        "superclass is not registered; ignoring"
                    );
                }
                found
            }
            None => self.find_by_name(JAVA_LANG_OBJECT).map(|c| c.id),
        };

        let id = if class.interface {
            self.add_interface(&class.name, superclass)
        } else {
            self.add_class(&class.name, superclass)
        };

        for name in &class.interfaces {
            match self.find_by_name(name).map(|c| c.id) {
                Some(interface) => self.implement(id, interface),
                None => tracing::warn!(
                    target: "svm.jdwp",
                    class = %class.name,
                    interface = %name,
                    "interface is not registered; ignoring"
                ),
            }
        }

        if let Some(entry) = self.find_mut(id) {
            entry.modifiers = class.modifiers;
            entry.source_file = class.source_file.clone();
        }
        for field in &class.fields {
            self.add_field(id, &field.name, &field.signature, field.modifiers);
        }
        for method in &class.methods {
            self.add_method(
                id,
                &method.name,
                &method.signature,
                method.modifiers,
                LineTable::new(method.lines.clone()),
            );
        }
    }

    /// The application entry class when no metadata was configured for it: a
    /// synthetic constructor and a static `main`.
    fn add_default_main(&mut self, name: &str, source: &str) -> ReferenceTypeId {
        let object = self.find_by_name(JAVA_LANG_OBJECT).map(|c| c.id);
        let id = self.add_class(name, object);
        if let Some(entry) = self.find_mut(id) {
            entry.modifiers = ACC_PUBLIC;
            entry.source_file = Some(source.to_string());
        }
        self.add_method(
            id,
            "<init>",
            "()V",
            ACC_PUBLIC | ACC_SYNTHETIC,
            LineTable::new(vec![(0, 1)]),
        );
        self.add_method(
            id,
            "main",
            "([Ljava/lang/String;)V",
            ACC_PUBLIC | ACC_STATIC,
            LineTable::new(vec![(2, 3)]),
        );
        id
    }

    fn add_ref(&mut self, name: &str, type_tag: u8, superclass: Option<ReferenceTypeId>) -> ReferenceTypeId {
        let id = self.next_id;
        self.next_id += 1;
        self.classes.push(RefType {
            id,
            type_tag,
            name: name.to_string(),
            signature: class_name_to_signature(name),
            source_file: None,
            modifiers: 0,
            status: CLASS_STATUS_VERIFIED | CLASS_STATUS_PREPARED | CLASS_STATUS_INITIALIZED,
            superclass,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
        });
        id
    }

    pub fn add_class(&mut self, name: &str, superclass: Option<ReferenceTypeId>) -> ReferenceTypeId {
        self.add_ref(name, TYPE_TAG_CLASS, superclass)
    }

    pub fn add_interface(&mut self, name: &str, superclass: Option<ReferenceTypeId>) -> ReferenceTypeId {
        self.add_ref(name, TYPE_TAG_INTERFACE, superclass)
    }

    /// Register `<name>$*` alongside `of` so wildcard inner-class patterns resolve.
    pub fn add_inner_wildcard(&mut self, of: ReferenceTypeId) -> Option<ReferenceTypeId> {
        let (name, tag, superclass) = {
            let outer = self.find_by_id(of)?;
            (format!("{}$*", outer.name), outer.type_tag, outer.superclass)
        };
        Some(self.add_ref(&name, tag, superclass))
    }

    pub fn implement(&mut self, class: ReferenceTypeId, interface: ReferenceTypeId) {
        if let Some(entry) = self.find_mut(class) {
            entry.interfaces.push(interface);
        }
    }

    /// Field ids are 1-based positions within the declaring class.
    pub fn add_field(
        &mut self,
        class: ReferenceTypeId,
        name: &str,
        signature: &str,
        modifiers: u32,
    ) -> Option<FieldId> {
        let entry = self.find_mut(class)?;
        let id = entry.fields.len() as FieldId + 1;
        entry.fields.push(FieldInfo {
            id,
            name: name.to_string(),
            signature: signature.to_string(),
            modifiers,
        });
        Some(id)
    }

    /// Method ids are 1-based positions within the declaring class.
    pub fn add_method(
        &mut self,
        class: ReferenceTypeId,
        name: &str,
        signature: &str,
        modifiers: u32,
        line_table: LineTable,
    ) -> Option<MethodId> {
        let entry = self.find_mut(class)?;
        let id = entry.methods.len() as MethodId + 1;
        entry.methods.push(MethodInfo {
            id,
            name: name.to_string(),
            signature: signature.to_string(),
            modifiers,
            line_table,
        });
        Some(id)
    }

    fn find_mut(&mut self, id: ReferenceTypeId) -> Option<&mut RefType> {
        self.classes.iter_mut().find(|c| c.id == id)
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn main_class(&self) -> Option<&RefType> {
        self.main_class.and_then(|id| self.find_by_id(id))
    }

    // Newest registrations win, so scans run from the back.

    pub fn find_by_name(&self, name: &str) -> Option<&RefType> {
        self.classes.iter().rev().find(|c| c.name == name)
    }

    pub fn find_by_signature(&self, signature: &str) -> Option<&RefType> {
        self.classes.iter().rev().find(|c| c.signature == signature)
    }

    pub fn find_by_id(&self, id: ReferenceTypeId) -> Option<&RefType> {
        self.classes.iter().rev().find(|c| c.id == id)
    }

    pub fn method(&self, class: ReferenceTypeId, method: MethodId) -> Option<&MethodInfo> {
        self.find_by_id(class)?.method(method)
    }

    /// One entry per class in registration order: tag, reference id, signature,
    /// optionally an empty generic signature, status.
    pub fn all_classes_to_list(&self, packets: &PacketFactory, with_generic: bool) -> PacketList {
        let sizes = packets.id_sizes();
        let mut list = PacketList::new();
        for class in self.classes.iter().rev() {
            let generic = if with_generic { 4 } else { 0 };
            let mut p = packets.raw(
                1 + sizes.reference_type_id + str_size(&class.signature) + generic + 4,
            );
            p.write_tag(class.type_tag);
            p.write_reference_type_id(class.id);
            p.write_str(&class.signature);
            if with_generic {
                p.write_str("");
            }
            p.write_u32(class.status);
            list.push(p);
        }
        list
    }

    /// Declared fields of `class` in declaration order.
    pub fn fields_to_list(&self, packets: &PacketFactory, class: &RefType, with_generic: bool) -> PacketList {
        let mut list = PacketList::new();
        for field in class.fields.iter().rev() {
            let mut p = member_packet(packets, &field.name, &field.signature, with_generic);
            p.write_u32(field.modifiers);
            let mut entry = packets.raw(packets.id_sizes().field_id + p.position());
            entry.write_field_id(field.id);
            entry.write_packet(&p);
            list.push(entry);
        }
        list
    }

    /// Declared methods of `class` in declaration order.
    pub fn methods_to_list(&self, packets: &PacketFactory, class: &RefType, with_generic: bool) -> PacketList {
        let mut list = PacketList::new();
        for method in class.methods.iter().rev() {
            let mut p = member_packet(packets, &method.name, &method.signature, with_generic);
            p.write_u32(method.modifiers);
            let mut entry = packets.raw(packets.id_sizes().method_id + p.position());
            entry.write_method_id(method.id);
            entry.write_packet(&p);
            list.push(entry);
        }
        list
    }
}

fn member_packet(packets: &PacketFactory, name: &str, signature: &str, with_generic: bool) -> Packet {
    let generic = if with_generic { 4 } else { 0 };
    let mut p = packets.raw(str_size(name) + str_size(signature) + generic + 4);
    p.write_str(name);
    p.write_str(signature);
    if with_generic {
        p.write_str("");
    }
    p
}
