//! 端口映射解析
//!
//! 容器运行时返回的端口发布信息形态并不统一：可能是裸端口号、数字字符串、
//! `{"8080/tcp": [{"HostIp": "0.0.0.0", "HostPort": "49153"}]}` 这样的映射，
//! 也可能直接是绑定记录列表。这里先把任意 JSON 收敛为一个封闭的枚举，
//! 再从中解析出唯一可靠的宿主机端口。
//!
//! 整个解析过程是全函数：任何输入都只会得到 `Some(port)` 或 `None`，不会 panic。

use serde_json::Value;

/// 宿主机绑定记录中的端口字段名
const HOST_PORT_KEY: &str = "HostPort";

/// 端口标量
#[derive(Debug, Clone, PartialEq)]
pub enum PortScalar {
    Int(i64),
    Float(f64),
    Text(String),
}

impl PortScalar {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n
                .as_i64()
                .map(PortScalar::Int)
                .or_else(|| n.as_f64().map(PortScalar::Float)),
            Value::String(s) => Some(PortScalar::Text(s.clone())),
            _ => None,
        }
    }

    /// 仅当值为 `[1, 65535]` 内的整数（或恰为整数的浮点数、十进制整数字符串）时返回端口
    pub fn as_port(&self) -> Option<u16> {
        match self {
            PortScalar::Int(n) => port_from_i64(*n),
            PortScalar::Float(f) => {
                if f.is_finite() && f.fract() == 0.0 && (1.0..=65535.0).contains(f) {
                    Some(*f as u16)
                } else {
                    None
                }
            }
            PortScalar::Text(s) => s.trim().parse::<i64>().ok().and_then(port_from_i64),
        }
    }
}

fn port_from_i64(n: i64) -> Option<u16> {
    if (1..=65535).contains(&n) {
        u16::try_from(n).ok()
    } else {
        None
    }
}

/// 一条宿主机绑定记录
///
/// 非对象形态的记录也会保留为空记录，以保证“只看第一条记录”的语义不被打乱。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostBinding {
    pub host_port: Option<PortScalar>,
}

impl HostBinding {
    fn from_value(value: &Value) -> Self {
        match value {
            Value::Object(map) => Self {
                host_port: map.get(HOST_PORT_KEY).and_then(PortScalar::from_value),
            },
            _ => Self::default(),
        }
    }

    fn port(&self) -> Option<u16> {
        self.host_port.as_ref().and_then(PortScalar::as_port)
    }
}

/// 运行时原始端口数据的封闭表示
#[derive(Debug, Clone, Default, PartialEq)]
pub enum RawPortMapping {
    /// 无端口信息（`null` 或字段缺失）
    #[default]
    Absent,
    /// 裸端口号或数字字符串
    Scalar(PortScalar),
    /// 绑定记录列表
    Bindings(Vec<HostBinding>),
    /// 内部端口 -> 绑定记录列表，保持运行时给出的顺序；值不是列表时为 `None`
    Map(Vec<(String, Option<Vec<HostBinding>>)>),
    /// 无法识别的形态
    Unsupported,
}

impl RawPortMapping {
    /// 由任意 JSON 值构造，永不失败
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Null => RawPortMapping::Absent,
            Value::Number(_) | Value::String(_) => PortScalar::from_value(value)
                .map(RawPortMapping::Scalar)
                .unwrap_or(RawPortMapping::Unsupported),
            Value::Array(items) => {
                RawPortMapping::Bindings(items.iter().map(HostBinding::from_value).collect())
            }
            Value::Object(map) => RawPortMapping::Map(
                map.iter()
                    .map(|(spec, bindings)| {
                        let bindings = bindings
                            .as_array()
                            .map(|items| items.iter().map(HostBinding::from_value).collect());
                        (spec.clone(), bindings)
                    })
                    .collect(),
            ),
            Value::Bool(_) => RawPortMapping::Unsupported,
        }
    }
}

impl From<&Value> for RawPortMapping {
    fn from(value: &Value) -> Self {
        Self::from_value(value)
    }
}

/// 解析宿主机端口
///
/// 映射按顺序遍历，取第一个“首条记录带有效端口”的条目，首个命中即返回。
pub fn resolve_host_port(raw: &RawPortMapping) -> Option<u16> {
    match raw {
        RawPortMapping::Scalar(scalar) => scalar.as_port(),
        RawPortMapping::Bindings(bindings) => first_binding_port(bindings),
        RawPortMapping::Map(entries) => entries
            .iter()
            .find_map(|(_, bindings)| bindings.as_deref().and_then(first_binding_port)),
        RawPortMapping::Absent | RawPortMapping::Unsupported => None,
    }
}

/// 直接从 JSON 值解析
pub fn resolve_json(value: &Value) -> Option<u16> {
    resolve_host_port(&RawPortMapping::from_value(value))
}

fn first_binding_port(bindings: &[HostBinding]) -> Option<u16> {
    bindings.first().and_then(HostBinding::port)
}
