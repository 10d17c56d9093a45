//! Paint commands produced from layout, in CSS pixel coordinates.

use super::layout::{ElementType, LayoutNode};

const RULE_RGBA: (u8, u8, u8, u8) = (204, 204, 204, 255);

#[derive(Debug, Clone, PartialEq)]
pub enum PaintCommand {
    SolidRect {
        x: i32,
        y: i32,
        width: u32,
        height: u32,
        rgba: (u8, u8, u8, u8),
    },
    Outline {
        x: i32,
        y: i32,
        width: u32,
        height: u32,
        rgba: (u8, u8, u8, u8),
    },
    Text {
        x: i32,
        y: i32,
        text: String,
        scale: u32,
        rgba: (u8, u8, u8, u8),
    },
    Image {
        x: i32,
        y: i32,
        width: u32,
        height: u32,
        src: String,
    },
}

/// Turn layout nodes into an ordered display list (painter's order).
pub fn build_display_list(nodes: &[LayoutNode]) -> Vec<PaintCommand> {
    let mut commands = Vec::with_capacity(nodes.len() * 2);
    for node in nodes {
        let rect = &node.lb.rect;
        if let Some(bg) = node.background {
            commands.push(PaintCommand::SolidRect {
                x: rect.x,
                y: rect.y,
                width: rect.width,
                height: rect.height,
                rgba: (bg[0], bg[1], bg[2], 255),
            });
        }
        match node.elem_type {
            ElementType::Background => {}
            ElementType::Rule => commands.push(PaintCommand::SolidRect {
                x: rect.x,
                y: rect.y,
                width: rect.width,
                height: rect.height,
                rgba: RULE_RGBA,
            }),
            ElementType::Image => {
                if let Some(src) = &node.image_src {
                    commands.push(PaintCommand::Image {
                        x: rect.x,
                        y: rect.y,
                        width: rect.width,
                        height: rect.height,
                        src: src.clone(),
                    });
                }
            }
            ElementType::TableCell => {
                commands.push(PaintCommand::Outline {
                    x: rect.x,
                    y: rect.y,
                    width: rect.width,
                    height: rect.height,
                    rgba: RULE_RGBA,
                });
                push_text(&mut commands, node);
            }
            ElementType::Heading(_)
            | ElementType::Paragraph
            | ElementType::ListItem
            | ElementType::Text => push_text(&mut commands, node),
        }
    }
    commands
}

fn push_text(commands: &mut Vec<PaintCommand>, node: &LayoutNode) {
    if node.text.is_empty() {
        return;
    }
    let inset = (node.lb.box_model.border + node.lb.box_model.padding) as i32;
    commands.push(PaintCommand::Text {
        x: node.lb.rect.x.saturating_add(inset),
        y: node.lb.rect.y.saturating_add(inset),
        text: node.text.clone(),
        scale: node.scale,
        rgba: (node.color[0], node.color[1], node.color[2], 255),
    });
}
