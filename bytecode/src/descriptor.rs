use anyhow::{Context, Result, bail};
use common::BasicType;

#[derive(Debug)]
pub struct FieldDescriptor {
    pub field_type: FieldType,
}

impl FieldDescriptor {
    pub fn new(raw: &str) -> Result<Self> {
        let field_type = FieldType::new(raw)?;
        if field_type.length() != raw.len() {
            bail!("trailing characters in field descriptor: {raw}");
        }

        Ok(Self { field_type })
    }
}

#[derive(Debug)]
pub struct MethodDescriptor {
    pub return_descriptor: ReturnDescriptor,
    pub parameters: Vec<FieldType>,
}

impl MethodDescriptor {
    pub fn new(raw: &str) -> Result<Self> {
        if !raw.starts_with('(') {
            bail!("invalid method descriptor: no '(' in {raw}");
        }
        let end_of_parameter_descriptor =
            raw.find(')').context("invalid method descriptor: no ')'")?;

        let mut raw_parameter_descriptor = &raw[1..end_of_parameter_descriptor];
        let mut parameters = Vec::new();
        while !raw_parameter_descriptor.is_empty() {
            let parameter = FieldType::new(raw_parameter_descriptor)?;
            raw_parameter_descriptor = &raw_parameter_descriptor[parameter.length()..];
            parameters.push(parameter);
        }

        let raw_return_descriptor = &raw[end_of_parameter_descriptor + 1..];

        let return_descriptor = if raw_return_descriptor == "V" {
            ReturnDescriptor::Void
        } else {
            ReturnDescriptor::FieldType(FieldDescriptor::new(raw_return_descriptor)?.field_type)
        };

        Ok(Self {
            return_descriptor,
            parameters,
        })
    }

    /// Stack words taken by the declared parameters, receiver excluded
    pub fn parameter_slots(&self) -> usize {
        self.parameters
            .iter()
            .map(|parameter| parameter.basic_type().slots())
            .sum()
    }

    pub fn return_type(&self) -> BasicType {
        match &self.return_descriptor {
            ReturnDescriptor::Void => BasicType::Void,
            ReturnDescriptor::FieldType(field_type) => field_type.basic_type(),
        }
    }
}

#[derive(Debug, PartialEq)]
pub enum ReturnDescriptor {
    Void,
    FieldType(FieldType),
}

#[derive(Debug, PartialEq, Clone)]
pub enum FieldType {
    BaseType(BaseType),
    ObjectType { class_name: String },
    ComponentType(Box<FieldType>),
}

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum BaseType {
    Byte,
    Char,
    Double,
    Float,
    Int,
    Long,
    Short,
    Boolean,
}

impl FieldType {
    /// Parses the first field type in `raw`, the rest is ignored
    pub fn new(raw: &str) -> Result<Self> {
        let first = raw.get(0..1).context("empty field type")?;
        Ok(match first {
            "B" => Self::BaseType(BaseType::Byte),
            "C" => Self::BaseType(BaseType::Char),
            "D" => Self::BaseType(BaseType::Double),
            "F" => Self::BaseType(BaseType::Float),
            "I" => Self::BaseType(BaseType::Int),
            "J" => Self::BaseType(BaseType::Long),
            "S" => Self::BaseType(BaseType::Short),
            "Z" => Self::BaseType(BaseType::Boolean),
            "L" => {
                let end = raw
                    .find(';')
                    .context(format!("unterminated object type: {raw}"))?;
                Self::ObjectType {
                    class_name: raw[1..end].to_string(),
                }
            }
            "[" => Self::ComponentType(Box::new(Self::new(&raw[1..])?)),
            _ => bail!("unknown field type: {raw}"),
        })
    }

    pub fn length(&self) -> usize {
        match self {
            FieldType::BaseType(_) => 1,
            FieldType::ObjectType { class_name } => class_name.len() + 2,
            FieldType::ComponentType(field_type) => field_type.length() + 1,
        }
    }

    pub fn basic_type(&self) -> BasicType {
        match self {
            FieldType::BaseType(base_type) => match base_type {
                BaseType::Byte => BasicType::Byte,
                BaseType::Char => BasicType::Char,
                BaseType::Double => BasicType::Double,
                BaseType::Float => BasicType::Float,
                BaseType::Int => BasicType::Int,
                BaseType::Long => BasicType::Long,
                BaseType::Short => BasicType::Short,
                BaseType::Boolean => BasicType::Boolean,
            },
            FieldType::ObjectType { .. } => BasicType::Object,
            FieldType::ComponentType(_) => BasicType::Array,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_descriptor() {
        let descriptor = MethodDescriptor::new("(IDLjava/lang/Thread;)Ljava/lang/Object;").unwrap();
        assert_eq!(
            descriptor.parameters,
            vec![
                FieldType::BaseType(BaseType::Int),
                FieldType::BaseType(BaseType::Double),
                FieldType::ObjectType {
                    class_name: "java/lang/Thread".to_string()
                }
            ]
        );

        assert_eq!(
            descriptor.return_descriptor,
            ReturnDescriptor::FieldType(FieldType::ObjectType {
                class_name: "java/lang/Object".to_string()
            })
        );
        assert_eq!(descriptor.parameter_slots(), 4);
        assert_eq!(descriptor.return_type(), BasicType::Object);
    }

    #[test]
    fn method_descriptor_object_before_primitive() {
        let descriptor = MethodDescriptor::new("(Ljava/lang/String;J)V").unwrap();
        assert_eq!(
            descriptor.parameters,
            vec![
                FieldType::ObjectType {
                    class_name: "java/lang/String".to_string()
                },
                FieldType::BaseType(BaseType::Long),
            ]
        );
        assert_eq!(descriptor.parameter_slots(), 3);
    }

    #[test]
    fn method_descriptor_arrays() {
        let descriptor = MethodDescriptor::new("([[[D)V").unwrap();
        assert_eq!(
            descriptor.parameters,
            vec![FieldType::ComponentType(Box::new(
                FieldType::ComponentType(Box::new(FieldType::ComponentType(Box::new(
                    FieldType::BaseType(BaseType::Double)
                ))))
            ))]
        );

        assert_eq!(descriptor.return_descriptor, ReturnDescriptor::Void);
        assert_eq!(descriptor.return_type(), BasicType::Void);
        assert_eq!(descriptor.parameter_slots(), 1);
    }

    #[test]
    fn invalid_descriptors() {
        assert!(MethodDescriptor::new("I)V").is_err());
        assert!(MethodDescriptor::new("(Q)V").is_err());
        assert!(MethodDescriptor::new("(Ljava/lang/Object)V").is_err());
        assert!(FieldDescriptor::new("II").is_err());
    }

    #[test]
    fn field_basic_types() {
        assert_eq!(FieldDescriptor::new("Z").unwrap().field_type.basic_type(), BasicType::Boolean);
        assert_eq!(FieldDescriptor::new("[I").unwrap().field_type.basic_type(), BasicType::Array);
        assert_eq!(
            FieldDescriptor::new("Ljava/lang/Object;").unwrap().field_type.basic_type(),
            BasicType::Object
        );
    }
}
